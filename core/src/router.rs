//! Maps a completed raw response to exactly one terminal outcome.
//!
//! # Routing rules
//! 1. Transport-level failure: client-error handler.
//! 2. Status >= 400: server-error handler. The body is not decoded.
//! 3. Empty body: no-op success, no handler runs.
//! 4. Decode failure: client-error handler.
//! 5. Decoded value: the operation's own handler if it has one, otherwise the
//!    registry handler for its type. With neither, the value is discarded and
//!    a warning is logged.
//!
//! Panics inside handlers are caught here and never reach the aggregator. A
//! failure with no error handler registered is returned as
//! [`QueryError::Unhandled`] for the aggregate result.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::{ErrorClass, QueryError};
use crate::http::HttpResponse;

/// Terminal state of one routed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A success handler consumed the decoded value.
    Delivered,
    /// Status < 400 with no body.
    Empty,
    /// Decoded, but no success handler was registered for the type.
    Discarded,
    /// Routed to an error handler, or `Unhandled` if none was registered.
    Failed(QueryError),
}

type ErrorHandler<'a> = Box<dyn Fn(&QueryError) + Send + Sync + 'a>;

trait ErasedHandler: Send + Sync {
    fn invoke(&self, value: Box<dyn Any>);
}

struct TypedHandler<T, F> {
    handler: F,
    _value: PhantomData<fn(T)>,
}

impl<T, F> ErasedHandler for TypedHandler<T, F>
where
    T: 'static,
    F: Fn(T) + Send + Sync,
{
    fn invoke(&self, value: Box<dyn Any>) {
        // Keyed by TypeId::of::<T>(), so the downcast cannot miss.
        if let Ok(value) = value.downcast::<T>() {
            (self.handler)(*value);
        }
    }
}

/// Per-type success handlers plus one server and one client error handler.
///
/// The first success handler registered for a type wins. Error handlers are
/// replaced by later registrations.
#[derive(Default)]
pub struct HandlerRegistry<'a> {
    success: HashMap<TypeId, Box<dyn ErasedHandler + 'a>>,
    server_error: Option<ErrorHandler<'a>>,
    client_error: Option<ErrorHandler<'a>>,
}

impl<'a> HandlerRegistry<'a> {
    pub fn new() -> Self {
        Self {
            success: HashMap::new(),
            server_error: None,
            client_error: None,
        }
    }

    /// Returns `false` if a handler for `T` was already registered.
    pub fn on_success<T, F>(&mut self, handler: F) -> bool
    where
        T: 'static,
        F: Fn(T) + Send + Sync + 'a,
    {
        let key = TypeId::of::<T>();
        if self.success.contains_key(&key) {
            tracing::debug!(result_type = type_name::<T>(), "success handler already registered");
            return false;
        }
        let handler = TypedHandler {
            handler,
            _value: PhantomData,
        };
        self.success.insert(key, Box::new(handler));
        true
    }

    pub fn on_server_error(&mut self, handler: impl Fn(&QueryError) + Send + Sync + 'a) {
        self.server_error = Some(Box::new(handler));
    }

    pub fn on_client_error(&mut self, handler: impl Fn(&QueryError) + Send + Sync + 'a) {
        self.client_error = Some(Box::new(handler));
    }

    pub fn has_success<T: 'static>(&self) -> bool {
        self.success.contains_key(&TypeId::of::<T>())
    }

    fn error_handler(&self, class: ErrorClass) -> Option<&ErrorHandler<'a>> {
        match class {
            ErrorClass::Server => self.server_error.as_ref(),
            ErrorClass::Client => self.client_error.as_ref(),
        }
    }
}

/// Decodes responses with `C` and dispatches them to registered handlers.
pub struct ResponseRouter<'a, C> {
    codec: C,
    registry: HandlerRegistry<'a>,
}

impl<'a, C: Codec> ResponseRouter<'a, C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            registry: HandlerRegistry::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry<'a> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry<'a> {
        &mut self.registry
    }

    /// Route using the registry handler for `T`.
    pub fn route<T>(&self, label: &str, response: Result<HttpResponse, QueryError>) -> Outcome
    where
        T: DeserializeOwned + 'static,
    {
        self.route_with::<T, fn(T)>(label, response, None)
    }

    /// Route to `on_success` if given, otherwise to the registry handler.
    pub fn route_with<T, F>(
        &self,
        label: &str,
        response: Result<HttpResponse, QueryError>,
        on_success: Option<F>,
    ) -> Outcome
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T),
    {
        let response = match response {
            Ok(response) => response,
            Err(error) => return self.fail(label, error),
        };

        if response.is_server_error() {
            let error = QueryError::Server {
                status: response.status,
                body: response.body_text(),
            };
            return self.fail(label, error);
        }

        if !response.has_body() {
            tracing::debug!(label, status = response.status, "empty body, nothing to deliver");
            return Outcome::Empty;
        }

        let value: T = match self.codec.decode(&response.body) {
            Ok(value) => value,
            Err(error) => return self.fail(label, error.into()),
        };

        let delivered = match on_success {
            Some(handler) => catch_unwind(AssertUnwindSafe(move || handler(value))),
            None => match self.registry.success.get(&TypeId::of::<T>()) {
                Some(handler) => {
                    catch_unwind(AssertUnwindSafe(|| handler.invoke(Box::new(value))))
                }
                None => {
                    tracing::warn!(
                        label,
                        result_type = type_name::<T>(),
                        "decoded value discarded: no success handler registered"
                    );
                    return Outcome::Discarded;
                }
            },
        };

        match delivered {
            Ok(()) => {
                tracing::debug!(label, status = response.status, "delivered");
                Outcome::Delivered
            }
            Err(_) => self.fail(
                label,
                QueryError::HandlerPanicked {
                    label: label.to_string(),
                },
            ),
        }
    }

    /// Route a failure to its error handler. Always yields `Outcome::Failed`.
    pub fn fail(&self, label: &str, error: QueryError) -> Outcome {
        let class = error.class();
        match self.registry.error_handler(class) {
            Some(handler) => {
                tracing::debug!(label, %class, %error, "routing failure to error handler");
                if catch_unwind(AssertUnwindSafe(|| handler(&error))).is_err() {
                    tracing::warn!(label, %class, "error handler panicked");
                }
                Outcome::Failed(error)
            }
            None => {
                tracing::warn!(label, %class, %error, "failure with no error handler registered");
                Outcome::Failed(QueryError::Unhandled {
                    class,
                    source: Box::new(error),
                })
            }
        }
    }
}
