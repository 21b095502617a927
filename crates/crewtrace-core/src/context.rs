//! Hierarchical trace context carried by the current thread.
//!
//! Every run has one root context; each nested unit of work derives a child
//! that shares the root's correlation and trace ids and points at its
//! creator through `parent_span_id`.
//!
//! The current context lives in a thread-local slot. Synchronous code uses
//! [`TraceContext::enter_child`], whose guard restores the previous context
//! on drop. Async code binds a context to a future with
//! [`TraceContext::scope`]; the context is installed around every poll and
//! the thread's own context is put back afterwards, so a future that migrates
//! between runtime workers always sees its own span and never leaks it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::types::new_id;

thread_local! {
    static CURRENT: RefCell<Option<TraceContext>> = const { RefCell::new(None) };
}

fn replace_current(ctx: Option<TraceContext>) -> Option<TraceContext> {
    CURRENT.with(|slot| slot.replace(ctx))
}

fn with_current_mut<R>(f: impl FnOnce(&mut TraceContext) -> R) -> Option<R> {
    CURRENT.with(|slot| slot.borrow_mut().as_mut().map(f))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    correlation_id: String,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    attributes: BTreeMap<String, String>,
    timings: BTreeMap<String, u64>,
    created: Instant,
    started_at: DateTime<Utc>,
}

impl TraceContext {
    fn root(correlation_id: String) -> Self {
        Self {
            correlation_id,
            trace_id: new_id(),
            span_id: new_id(),
            parent_span_id: None,
            attributes: BTreeMap::new(),
            timings: BTreeMap::new(),
            created: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Create a new root context and install it as current.
    pub fn create() -> TraceContext {
        Self::create_with_correlation(new_id())
    }

    /// Create a root context for a known correlation id and install it.
    pub fn create_with_correlation(correlation_id: impl Into<String>) -> TraceContext {
        let ctx = Self::root(correlation_id.into());
        replace_current(Some(ctx.clone()));
        ctx
    }

    /// Build a root context without touching the current thread.
    pub fn detached_root(correlation_id: impl Into<String>) -> TraceContext {
        Self::root(correlation_id.into())
    }

    /// Derive a child from the current context (a root is created when none
    /// is installed) and install the child as current.
    pub fn create_child() -> TraceContext {
        let parent = match Self::current() {
            Some(parent) => parent,
            None => Self::create(),
        };
        let child = parent.child();
        replace_current(Some(child.clone()));
        child
    }

    /// Derive a child of `self` without installing it. This is the value to
    /// move into work that runs on another thread.
    pub fn child(&self) -> TraceContext {
        Self {
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: new_id(),
            parent_span_id: Some(self.span_id.clone()),
            attributes: self.attributes.clone(),
            timings: BTreeMap::new(),
            created: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Snapshot of the context installed on this thread.
    pub fn current() -> Option<TraceContext> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Correlation id of the current context, if any.
    pub fn current_correlation_id() -> Option<String> {
        CURRENT.with(|slot| slot.borrow().as_ref().map(|c| c.correlation_id.clone()))
    }

    /// Reinstall `previous` as current, or clear the slot when `None`.
    pub fn restore(previous: Option<TraceContext>) {
        replace_current(previous);
    }

    /// Create and install a child span; the returned guard restores the
    /// previous context when dropped, including during unwinding.
    pub fn enter_child() -> SpanGuard {
        let previous = Self::current();
        let context = Self::create_child();
        SpanGuard { previous, context }
    }

    /// Bind this context to a future. The context is current during every
    /// poll of `fut`; changes the future makes (child spans, timings) are
    /// kept with it between polls.
    pub fn scope<'a, T>(self, fut: impl Future<Output = T> + Send + 'a) -> Scoped<'a, T> {
        Scoped {
            inner: fut.boxed(),
            context: Some(self),
        }
    }

    /// Attach a timing to the current context only.
    pub fn record_timing(phase: impl Into<String>, ms: u64) {
        let phase = phase.into();
        with_current_mut(|ctx| {
            ctx.timings.insert(phase, ms);
        });
    }

    /// Set an attribute on the current context only. Children created
    /// afterwards inherit it.
    pub fn set_attribute(key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        with_current_mut(|ctx| {
            ctx.attributes.insert(key, value);
        });
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn timings(&self) -> &BTreeMap<String, u64> {
        &self.timings
    }

    pub fn timing(&self, phase: &str) -> Option<u64> {
        self.timings.get(phase).copied()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock milliseconds since this context was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }
}

/// Restores the previously current context when dropped.
#[must_use = "dropping the guard immediately closes the span"]
pub struct SpanGuard {
    previous: Option<TraceContext>,
    context: TraceContext,
}

impl SpanGuard {
    /// The span this guard opened.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        replace_current(self.previous.take());
    }
}

/// Future returned by [`TraceContext::scope`].
pub struct Scoped<'a, T> {
    inner: BoxFuture<'a, T>,
    context: Option<TraceContext>,
}

/// Swaps the future's context back out after a poll, even if it panicked.
struct PollGuard<'s> {
    saved: &'s mut Option<TraceContext>,
    previous: Option<Option<TraceContext>>,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.saved = replace_current(previous);
        }
    }
}

impl<T> Future for Scoped<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let previous = replace_current(this.context.take());
        let _guard = PollGuard {
            saved: &mut this.context,
            previous: Some(previous),
        };
        this.inner.as_mut().poll(cx)
    }
}
