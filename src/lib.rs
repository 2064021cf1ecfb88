pub mod path;
pub mod protocol;
pub mod store;
pub mod types;

pub use path::Path;
pub use protocol::{ClientError, ServerError, StateClient, StateServer};
pub use store::{ArrayValue, Node, Scalar, StateStore, Value};
pub use types::{Dtype, TransferType};
