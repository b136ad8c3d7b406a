//! A streaming XML 1.0 parser with nested entity spooling, encoding
//! auto-sense and DTD validation.
//!
//! Events are pushed into a handler implementing the traits in [`sax`]:
//!
//! ```no_run
//! use dtd_oxide::sax::{DocumentHandler, ElementName, Attribute, ParseOptions, Parser};
//!
//! #[derive(Default)]
//! struct Counter(usize);
//!
//! impl DocumentHandler for Counter {
//!     fn start_tag(&mut self, _name: &ElementName, _attrs: &[Attribute], _is_empty: bool) {
//!         self.0 += 1;
//!     }
//! }
//! impl dtd_oxide::sax::DtdHandler for Counter {}
//! impl dtd_oxide::sax::ErrorHandler for Counter {}
//! impl dtd_oxide::sax::EntityResolver for Counter {}
//!
//! let mut parser = Parser::new(Counter::default());
//! parser.parse_buffer("mem.xml", b"<a><b/></a>", ParseOptions::NONE).unwrap();
//! assert_eq!(parser.handler().0, 2);
//! ```

pub mod chars;
pub mod dtd;
pub mod entity;
pub mod error;
pub mod escape;
pub mod sax;

pub use error::{Diagnostic, Error, ErrorCode, Severity, XmlResult};
