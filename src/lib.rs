pub mod config;
pub mod conversion;
pub mod desktop;
pub mod progress;

pub use config::{ClientConfig, ConfigError};
pub use conversion::{
    ConversionController, ConversionError, ConversionOptions, ConversionRequest,
    ConversionStatus, ErrorCategory, MediaType, SessionSnapshot, UploadFile,
};
pub use desktop::{BridgeError, DownloadRequest, FileSystemBridge, NativeFileBridge};
pub use progress::{ProgressChannel, ProgressEndpoint, ProgressEvent, ProgressStatus, ReconnectPolicy};
