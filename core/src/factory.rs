//! Named handler factories.
//!
//! The handler type is picked once per process from
//! `HTTPBRIDGE_HANDLER_TYPE`. Unknown names, and factories that decline to
//! build a handler, fall back to the default handler.

use std::env;
use std::sync::{Arc, OnceLock};

use crate::abi::NativeStack;
use crate::config::HandlerConfig;
use crate::handler::NativeHandler;

pub const HANDLER_TYPE_ENV: &str = "HTTPBRIDGE_HANDLER_TYPE";

pub type HandlerFactory = fn(Arc<dyn NativeStack>) -> Option<NativeHandler>;

static FACTORIES: &[(&str, HandlerFactory)] = &[
    ("default", default_handler),
    ("stateless", stateless_handler),
];

static HANDLER_TYPE: OnceLock<Option<String>> = OnceLock::new();

fn default_handler(stack: Arc<dyn NativeStack>) -> Option<NativeHandler> {
    Some(NativeHandler::new(stack))
}

/// No cookie jar and no proxy.
fn stateless_handler(stack: Arc<dyn NativeStack>) -> Option<NativeHandler> {
    let config = HandlerConfig {
        use_cookies: false,
        use_proxy: false,
        ..HandlerConfig::default()
    };
    NativeHandler::builder(stack).config(config).build().ok()
}

/// The configured handler type, read from the environment on first use.
pub fn handler_type() -> Option<&'static str> {
    HANDLER_TYPE
        .get_or_init(|| env::var(HANDLER_TYPE_ENV).ok().filter(|name| !name.trim().is_empty()))
        .as_deref()
}

pub fn lookup_factory(name: &str) -> Option<HandlerFactory> {
    FACTORIES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
        .map(|(_, factory)| *factory)
}

/// Build the handler named by `HTTPBRIDGE_HANDLER_TYPE`.
pub fn create_native_handler(stack: Arc<dyn NativeStack>) -> NativeHandler {
    create_named_handler(handler_type(), stack)
}

pub fn create_named_handler(name: Option<&str>, stack: Arc<dyn NativeStack>) -> NativeHandler {
    let Some(name) = name else {
        return NativeHandler::new(stack);
    };
    match lookup_factory(name) {
        Some(factory) => factory(stack.clone()).unwrap_or_else(|| {
            tracing::warn!(name, "handler factory declined; using the default handler");
            NativeHandler::new(stack)
        }),
        None => {
            tracing::warn!(name, "unknown handler type; using the default handler");
            NativeHandler::new(stack)
        }
    }
}
