//! Local control-plane IPC: a small textual request/response grammar over
//! a Unix-domain stream socket (see [`protocol`]), served by a blocking
//! accept loop (see [`server`]).

pub mod protocol;
pub mod server;

pub use protocol::Request;
