//! # mailtrack-mime
//!
//! Lenient MIME message parsing for inbound email.
//!
//! ## Features
//!
//! - **Message parsing**: Headers, recursive multipart trees, message ids
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 and RFC 2231 parameters
//! - **Charsets**: Any label `encoding_rs` knows, with a windows-1252 fallback
//! - **Addresses**: Mailbox lists with display names, comments and groups
//!
//! Parsing favours a best-effort result over an error: only input without
//! any header is rejected.
//!
//! ## Quick Start
//!
//! ```
//! use mailtrack_mime::Message;
//!
//! let raw = b"From: Jane <jane@example.com>\r\n\
//!             Subject: =?utf-8?Q?Caf=C3=A9?=\r\n\
//!             Content-Type: text/plain\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.subject().as_deref(), Some("Café"));
//! assert_eq!(message.from().unwrap().address, "jane@example.com");
//! assert_eq!(message.root.body_text(), "Hello, World!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;

pub mod charset;
pub mod encoding;

pub use address::{Mailbox, parse_mailbox_list, parse_message_ids};
pub use content_type::{ContentDisposition, ContentType, DispositionKind};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, Part, TransferEncoding};
