#![doc = include_str!("../README.md")]
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unsafe_code,
    unreachable_code,
    unused_mut,
    clippy::wildcard_imports
)]
#![warn(unused, unused_results, unused_qualifications, unreachable_pub)]

pub mod auth;
pub mod config;
mod error;
mod event;
pub mod http_binding;
pub mod logging;
mod options;
pub mod relay;
pub mod transport;

pub use self::auth::{build_secure_option, SecureOption};
pub use self::config::{decide_mode, Configuration, Mode};
pub use self::error::*;
pub use self::event::*;
pub use self::options::*;
pub use self::relay::EventRelay;
