use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to update DrainRequest status ({}/{}): '{}'", namespace, name, source))]
    UpdateDrainRequestStatus {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("DrainRequest '{}' has no namespace.", name))]
    MissingNamespace { name: String },

    #[snafu(display("Unable to create patch to send to Kubernetes API: '{}'", source))]
    CreateK8SPatch { source: serde_json::error::Error },

    #[snafu(display("DrainRequest condition must have valid rfc3339 timestamp: '{}'", source))]
    TimestampFormat { source: chrono::ParseError },
}
