//! Value objects handed to injected callback code.
//!
//! Injected code receives one of these and may cancel the enclosing call.
//! There is no orchestration behind them.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("the call {name} is not cancellable")]
pub struct CancellationError {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackInfo {
    name: String,
    cancellable: bool,
    cancelled: bool,
}

impl CallbackInfo {
    pub fn new(name: impl Into<String>, cancellable: bool) -> Self {
        Self { name: name.into(), cancellable, cancelled: false }
    }

    /// Name of the method the callback was injected into.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancel(&mut self) -> Result<(), CancellationError> {
        if !self.cancellable {
            return Err(CancellationError { name: self.name.clone() });
        }
        self.cancelled = true;
        Ok(())
    }
}

/// A [`CallbackInfo`] for methods with a return value.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackInfoReturnable<R> {
    info: CallbackInfo,
    return_value: Option<R>,
}

impl<R> CallbackInfoReturnable<R> {
    pub fn new(name: impl Into<String>, cancellable: bool) -> Self {
        Self { info: CallbackInfo::new(name, cancellable), return_value: None }
    }

    /// Starts from the value the method would have returned.
    pub fn with_value(name: impl Into<String>, cancellable: bool, value: R) -> Self {
        Self { info: CallbackInfo::new(name, cancellable), return_value: Some(value) }
    }

    pub fn info(&self) -> &CallbackInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn is_cancelled(&self) -> bool {
        self.info.is_cancelled()
    }

    pub fn cancel(&mut self) -> Result<(), CancellationError> {
        self.info.cancel()
    }

    /// Sets the value to return and cancels the call.
    pub fn set_return_value(&mut self, value: R) -> Result<(), CancellationError> {
        self.info.cancel()?;
        self.return_value = Some(value);
        Ok(())
    }

    pub fn return_value(&self) -> Option<&R> {
        self.return_value.as_ref()
    }

    pub fn into_return_value(self) -> Option<R> {
        self.return_value
    }
}
