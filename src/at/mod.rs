//! ESP-AT command protocol: response tokenizer and command transport.

pub mod parse;
pub mod transport;

pub use parse::{get_property, tokenize, ResponseDocument, ResponseLine, Token, TokenKind};
pub use transport::{CommError, CommandTransport, ResponseText};
