//! Per-call parameters for [`RpcClient`](crate::client::RpcClient).

use std::collections::HashMap;
use std::str::FromStr;

use reqwest::Method;

use crate::error::RpcError;

/// Body encoding of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `application/x-www-form-urlencoded` body from the form fields.
    Form,
    /// `application/json` body.
    Json,
    /// JSON body addressed through `{name}` path templates; same wire shape
    /// as [`Json`](Self::Json), kept distinct for configuration
    /// compatibility.
    Restful,
    /// `multipart/form-data` body carrying form fields and file parts.
    Multipart,
}

impl Protocol {
    /// The content type this protocol pins on the request, if any.
    /// Multipart is `None`: the transport sets it together with the
    /// boundary.
    #[must_use]
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Form => Some("application/x-www-form-urlencoded"),
            Self::Json | Self::Restful => Some("application/json"),
            Self::Multipart => None,
        }
    }
}

impl FromStr for Protocol {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x-form" => Ok(Self::Form),
            "x-json" => Ok(Self::Json),
            "x-restful" => Ok(Self::Restful),
            "x-file" => Ok(Self::Multipart),
            other => Err(RpcError::Configuration(format!(
                "unknown call protocol `{other}`"
            ))),
        }
    }
}

/// One file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Multipart field name.
    pub field: String,
    /// File name reported to the peer.
    pub file_name: String,
    /// File content.
    pub bytes: Vec<u8>,
}

/// Everything about a call except the service name and path.
///
/// Built fluently; the default is a `GET` with no parameters in the
/// client's configured protocol and group.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) method: Option<Method>,
    pub(crate) protocol: Option<Protocol>,
    pub(crate) path_params: HashMap<String, String>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) form: HashMap<String, String>,
    pub(crate) json: Option<serde_json::Value>,
    pub(crate) files: Vec<FileUpload>,
    pub(crate) group: Option<String>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP verb; `GET` when unset.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Body encoding for this call only, overriding the client's configured
    /// protocol. File attachments still force multipart.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Value for a `{name}` placeholder in the path.
    #[must_use]
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Appends a query-string parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets an explicit header, overriding any inherited context value of
    /// the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a body field, sent form-encoded or as a multipart text part
    /// depending on the protocol.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    /// JSON body for the `x-json` protocol.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Attaches a file, forcing the call onto the multipart protocol.
    #[must_use]
    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.files.push(FileUpload {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        });
        self
    }

    /// Registry group to resolve in; the client's default group when
    /// unset.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_known_modes() {
        assert_eq!("x-form".parse::<Protocol>().unwrap(), Protocol::Form);
        assert_eq!("x-json".parse::<Protocol>().unwrap(), Protocol::Json);
        assert_eq!("x-restful".parse::<Protocol>().unwrap(), Protocol::Restful);
        assert_eq!("x-file".parse::<Protocol>().unwrap(), Protocol::Multipart);
    }

    #[test]
    fn unknown_protocol_is_a_configuration_error() {
        let err = "soap".parse::<Protocol>().unwrap_err();
        assert!(matches!(err, RpcError::Configuration(msg) if msg.contains("soap")));
    }
}
