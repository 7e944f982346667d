//! Request frames for the commands the engine drives.

use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::message::{
    CLIENT_GET, CLIENT_HELLO, CLIENT_PUT, DATA_LENGTH_FIELD, DIRECTORY_FIELD, GENERATE_SSK,
    IDENTIFIER_FIELD, SUBSCRIBE_USK, TEST_DDA_REQUEST, TEST_DDA_RESPONSE, UNSUBSCRIBE_USK,
    URI_FIELD,
};

/// Protocol version requested in `ClientHello`.
pub const EXPECTED_VERSION: &str = "2.0";

/// Content sent back when the challenge file cannot be read.
pub const FAILED_TO_READ: &str = "failed-to-read";

/// Builds the greeting sent right after connecting.
#[must_use]
pub fn client_hello(name: &str) -> Frame {
    Frame::new(CLIENT_HELLO)
        .with_field("Name", name)
        .with_field("ExpectedVersion", EXPECTED_VERSION)
}

/// Scheduling priority of a request, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Class 0.
    Maximum,
    /// Class 1.
    Interactive,
    /// Class 2.
    SemiInteractive,
    /// Class 3.
    Update,
    /// Class 4.
    Bulk,
    /// Class 5.
    Prefetch,
    /// Class 6.
    Pause,
}

impl Priority {
    /// Numeric `PriorityClass` value.
    #[must_use]
    pub const fn class(self) -> u8 {
        match self {
            Self::Maximum => 0,
            Self::Interactive => 1,
            Self::SemiInteractive => 2,
            Self::Update => 3,
            Self::Bulk => 4,
            Self::Prefetch => 5,
            Self::Pause => 6,
        }
    }
}

/// Parameters of a `ClientGet` that returns its data directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRequest {
    /// Key to fetch.
    pub uri: String,
    /// Skip the local data store.
    pub ignore_data_store: bool,
    /// Only consult the local data store.
    pub data_store_only: bool,
    /// Largest acceptable result in bytes.
    pub max_size: Option<u64>,
    /// Scheduling priority.
    pub priority: Option<Priority>,
    /// Favour latency over throughput.
    pub real_time: bool,
    /// Place the request on the global queue.
    pub global: bool,
}

impl GetRequest {
    /// Fetch of `uri` with default options.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Encodes the request under `identifier`.
    #[must_use]
    pub fn to_frame(&self, identifier: &str) -> Frame {
        let mut frame = Frame::new(CLIENT_GET)
            .with_field(URI_FIELD, self.uri.as_str())
            .with_field(IDENTIFIER_FIELD, identifier)
            .with_field("ReturnType", "direct");
        if self.ignore_data_store {
            frame.set("IgnoreDS", "true");
        }
        if self.data_store_only {
            frame.set("DSonly", "true");
        }
        if let Some(max_size) = self.max_size {
            frame.set("MaxSize", max_size.to_string());
        }
        if let Some(priority) = self.priority {
            frame.set("PriorityClass", priority.class().to_string());
        }
        if self.real_time {
            frame.set("RealTimeFlag", "true");
        }
        if self.global {
            frame.set("Global", "true");
        }
        frame
    }
}

/// Where the content of an insert comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutSource {
    /// Bytes sent inline after the request.
    Direct(Vec<u8>),
    /// A file the node reads itself; may require the disk-access handshake.
    Disk(PathBuf),
    /// A redirect to another key.
    Redirect(String),
}

/// Parameters of a `ClientPut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// Target key.
    pub uri: String,
    /// Content source.
    pub source: PutSource,
    /// File name stored in the manifest.
    pub target_filename: Option<String>,
    /// Ask the node for `SimpleProgress` frames.
    pub report_progress: bool,
}

impl PutRequest {
    /// Insert of `source` under `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>, source: PutSource) -> Self {
        Self {
            uri: uri.into(),
            source,
            target_filename: None,
            report_progress: false,
        }
    }

    /// Directory the node must be allowed to read for a disk upload.
    #[must_use]
    pub fn upload_directory(&self) -> Option<String> {
        match &self.source {
            PutSource::Disk(path) => path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(|parent| parent.to_string_lossy().into_owned()),
            PutSource::Direct(_) | PutSource::Redirect(_) => None,
        }
    }

    /// Encodes the request under `identifier`.
    #[must_use]
    pub fn to_frame(&self, identifier: &str) -> Frame {
        let mut frame = Frame::new(CLIENT_PUT)
            .with_field(URI_FIELD, self.uri.as_str())
            .with_field(IDENTIFIER_FIELD, identifier);
        if self.report_progress {
            frame.set("Verbosity", "1");
        }
        match &self.source {
            PutSource::Direct(data) => {
                frame.set("UploadFrom", "direct");
                frame.set(DATA_LENGTH_FIELD, data.len().to_string());
            }
            PutSource::Disk(path) => {
                frame.set("UploadFrom", "disk");
                frame.set("Filename", path_text(path));
            }
            PutSource::Redirect(target) => {
                frame.set("UploadFrom", "redirect");
                frame.set("TargetURI", target.as_str());
            }
        }
        if let Some(name) = &self.target_filename {
            frame.set("TargetFilename", name.as_str());
        }
        if let PutSource::Direct(data) = &self.source {
            frame.set_payload(data.clone());
        }
        frame
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Asks the node to test read access to `directory`.
#[must_use]
pub fn test_dda_request(directory: &str) -> Frame {
    Frame::new(TEST_DDA_REQUEST)
        .with_field(DIRECTORY_FIELD, directory)
        .with_field("WantReadDirectory", "true")
        .with_field("WantWriteDirectory", "false")
}

/// Answers the node's read challenge for `directory`.
#[must_use]
pub fn test_dda_response(directory: &str, read_content: &str) -> Frame {
    Frame::new(TEST_DDA_RESPONSE)
        .with_field(DIRECTORY_FIELD, directory)
        .with_field("ReadContent", read_content)
}

/// Subscribes to edition updates of `uri`.
#[must_use]
pub fn subscribe_usk(uri: &str, identifier: &str) -> Frame {
    Frame::new(SUBSCRIBE_USK)
        .with_field(URI_FIELD, uri)
        .with_field(IDENTIFIER_FIELD, identifier)
}

/// Ends the subscription registered under `identifier`.
#[must_use]
pub fn unsubscribe_usk(identifier: &str) -> Frame {
    Frame::new(UNSUBSCRIBE_USK).with_field(IDENTIFIER_FIELD, identifier)
}

/// Requests a fresh SSK key pair.
#[must_use]
pub fn generate_ssk(identifier: &str) -> Frame {
    Frame::new(GENERATE_SSK).with_field(IDENTIFIER_FIELD, identifier)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn field_lines(frame: &Frame) -> Vec<String> {
        frame
            .fields()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    #[rstest]
    fn hello_requests_protocol_two() {
        let frame = client_hello("Test");
        assert_eq!(frame.name(), "ClientHello");
        assert_eq!(field_lines(&frame), ["Name=Test", "ExpectedVersion=2.0"]);
    }

    #[rstest]
    fn plain_get_asks_for_direct_data() {
        let frame = GetRequest::new("KSK@foo.txt").to_frame("id-1");
        assert_eq!(
            field_lines(&frame),
            ["URI=KSK@foo.txt", "Identifier=id-1", "ReturnType=direct"]
        );
    }

    #[rstest]
    fn get_options_map_to_fields() {
        let request = GetRequest {
            ignore_data_store: true,
            data_store_only: true,
            max_size: Some(1048576),
            priority: Some(Priority::Prefetch),
            real_time: true,
            global: true,
            ..GetRequest::new("KSK@foo.txt")
        };

        let frame = request.to_frame("id");

        assert_eq!(frame.field("IgnoreDS"), Some("true"));
        assert_eq!(frame.field("DSonly"), Some("true"));
        assert_eq!(frame.field("MaxSize"), Some("1048576"));
        assert_eq!(frame.field("PriorityClass"), Some("5"));
        assert_eq!(frame.field("RealTimeFlag"), Some("true"));
        assert_eq!(frame.field("Global"), Some("true"));
    }

    #[rstest]
    fn direct_put_carries_payload() {
        let frame = PutRequest::new("KSK@foo.txt", PutSource::Direct(b"Hello".to_vec()))
            .to_frame("id");

        assert_eq!(frame.field("UploadFrom"), Some("direct"));
        assert_eq!(frame.field("DataLength"), Some("5"));
        assert_eq!(frame.payload(), Some(&b"Hello"[..]));
    }

    #[rstest]
    fn disk_put_names_file_and_directory() {
        let request = PutRequest {
            target_filename: Some(String::from("index.html")),
            report_progress: true,
            ..PutRequest::new("KSK@foo.txt", PutSource::Disk(PathBuf::from("/tmp/site/data.txt")))
        };

        let frame = request.to_frame("id");

        assert_eq!(frame.field("UploadFrom"), Some("disk"));
        assert_eq!(frame.field("Filename"), Some("/tmp/site/data.txt"));
        assert_eq!(frame.field("TargetFilename"), Some("index.html"));
        assert_eq!(frame.field("Verbosity"), Some("1"));
        assert!(frame.payload().is_none());
        assert_eq!(request.upload_directory().as_deref(), Some("/tmp/site"));
    }

    #[rstest]
    fn redirect_put_has_no_directory() {
        let request = PutRequest::new("KSK@foo.txt", PutSource::Redirect(String::from("KSK@bar")));

        let frame = request.to_frame("id");

        assert_eq!(frame.field("TargetURI"), Some("KSK@bar"));
        assert_eq!(request.upload_directory(), None);
    }

    #[rstest]
    fn dda_frames_name_the_directory() {
        let request = test_dda_request("/tmp/site");
        assert_eq!(
            field_lines(&request),
            [
                "Directory=/tmp/site",
                "WantReadDirectory=true",
                "WantWriteDirectory=false"
            ]
        );

        let response = test_dda_response("/tmp/site", "test-content");
        assert_eq!(
            field_lines(&response),
            ["Directory=/tmp/site", "ReadContent=test-content"]
        );
    }
}
