//! Wire format of records and handshake messages.

mod alert;
mod certificate;
mod certificate_verify;
mod finished;
mod handshake;
mod hello;
mod random;
mod record;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::CertificateMsg;
pub use certificate_verify::CertificateVerify;
pub use finished::Finished;
pub use handshake::{Body, Handshake, MessageType, HANDSHAKE_HEADER_LEN};
pub use hello::Hello;
pub use random::{Random, RANDOM_LEN};
pub use record::{ContentType, ProtocolVersion, Record, RecordHeader, RECORD_HEADER_LEN};
