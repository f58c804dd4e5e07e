pub mod cli;
pub mod codec;
pub mod crc16;
pub mod driver;
pub mod error;
pub mod frame;
pub mod registry;
pub mod session;
pub mod sink;

pub use error::{CodecError, Error, ParseError, Result, SessionError};
pub use frame::{make_frame, Command, FrameParser, FrameType, ResponseFrame};
pub use registry::{DataType, ObjectInfo, OidRegistry, StaticRegistry};
pub use session::SessionReader;
