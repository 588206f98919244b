//! HTTP protocol objects exchanged between pipeline stages.

mod message;

pub use message::DecoderResult;
pub use message::FullMessage;
pub use message::Head;
pub use message::HttpContent;
pub use message::HttpObject;
pub use message::LastHttpContent;
pub use message::MessageHead;
