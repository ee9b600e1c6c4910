//! Prints the CustomResourceDefinition for `DrainRequest` as YAML.
use kube::CustomResourceExt;
use models::drain_request::DrainRequest;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&DrainRequest::crd())?);
    Ok(())
}
