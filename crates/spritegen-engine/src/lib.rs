pub mod clock;
pub mod dispatch;
pub mod generate;
pub mod payload;
pub mod transport;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use dispatch::{DispatchError, Dispatcher, Endpoint, FailureKind};
pub use generate::{AssetError, GenerationOptions, Generator, RunError, RunReport};
pub use payload::{build_payload, RequestPayload};
pub use transport::{HttpReply, HttpRequest, HttpTransport, ReqwestTransport, TransportError};
