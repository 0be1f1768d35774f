//! A value that is either already settled or still being computed.
//!
//! Every user extension point (filters, functions, tests, context callables
//! and loaders) returns a [`Deferred`]. Settled values are consumed in place,
//! so a render that never meets a pending value completes on its first poll
//! and can be driven synchronously. Only [`Deferred::Pending`] requires an
//! executor.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::task::{Context, Poll};

use futures_util::future::{self, BoxFuture, Either, FutureExt, Ready};
use futures_util::task::noop_waker_ref;

use crate::error::{Error, ErrorKind, Result};

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Unknown,
    Resolved,
    Rejected,
}

pub enum Deferred<T> {
    Resolved(T),
    Rejected(Error),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T: Send + 'static> Deferred<T> {
    pub fn resolve(value: T) -> Self {
        Deferred::Resolved(value)
    }

    pub fn reject(error: Error) -> Self {
        Deferred::Rejected(error)
    }

    /// Wrap a future, polling it once so that futures which are already
    /// complete come back settled.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut fut = fut.boxed();
        match poll_once(&mut fut) {
            Poll::Ready(Ok(value)) => Deferred::Resolved(value),
            Poll::Ready(Err(err)) => Deferred::Rejected(err),
            Poll::Pending => Deferred::Pending(fut),
        }
    }

    pub fn state(&self) -> DeferredState {
        match self {
            Deferred::Resolved(_) => DeferredState::Resolved,
            Deferred::Rejected(_) => DeferredState::Rejected,
            Deferred::Pending(_) => DeferredState::Unknown,
        }
    }

    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Deferred::Resolved(value) => Deferred::Resolved(f(value)),
            Deferred::Rejected(err) => Deferred::Rejected(err),
            Deferred::Pending(fut) => Deferred::Pending(fut.map(|res| res.map(f)).boxed()),
        }
    }

    /// Chain another deferred computation. Settled inputs run `f` immediately.
    pub fn and_then<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        match self {
            Deferred::Resolved(value) => f(value),
            Deferred::Rejected(err) => Deferred::Rejected(err),
            Deferred::Pending(fut) => Deferred::Pending(
                async move {
                    let value = fut.await?;
                    f(value).await
                }
                .boxed(),
            ),
        }
    }

    /// Unwrap without an executor. A value that is still pending is an error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Deferred::Resolved(value) => Ok(value),
            Deferred::Rejected(err) => Err(err),
            Deferred::Pending(fut) => run_sync(fut),
        }
    }
}

impl<T: Send + 'static> Deferred<Vec<T>> {
    /// Apply `f` to every item strictly in order. Items are processed in a
    /// plain loop while results come back settled; the first pending result
    /// moves the remainder into a single future.
    pub fn sequence<I, F>(items: I, mut f: F) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Send,
        F: FnMut(I::Item) -> Deferred<T> + Send + 'static,
    {
        let mut iter = items.into_iter();
        let mut out = Vec::new();
        while let Some(item) = iter.next() {
            match f(item) {
                Deferred::Resolved(value) => out.push(value),
                Deferred::Rejected(err) => return Deferred::Rejected(err),
                Deferred::Pending(fut) => {
                    return Deferred::Pending(
                        async move {
                            out.push(fut.await?);
                            for item in iter {
                                out.push(f(item).await?);
                            }
                            Ok(out)
                        }
                        .boxed(),
                    )
                }
            }
        }
        Deferred::Resolved(out)
    }
}

impl<T> From<Result<T>> for Deferred<T> {
    fn from(res: Result<T>) -> Self {
        match res {
            Ok(value) => Deferred::Resolved(value),
            Err(err) => Deferred::Rejected(err),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T>;
    type IntoFuture = Either<Ready<Result<T>>, BoxFuture<'static, Result<T>>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Deferred::Resolved(value) => Either::Left(future::ready(Ok(value))),
            Deferred::Rejected(err) => Either::Left(future::ready(Err(err))),
            Deferred::Pending(fut) => Either::Right(fut),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Resolved(value) => f.debug_tuple("Resolved").field(value).finish(),
            Deferred::Rejected(err) => f.debug_tuple("Rejected").field(err).finish(),
            Deferred::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

fn poll_once<T>(fut: &mut BoxFuture<'_, T>) -> Poll<T> {
    let mut cx = Context::from_waker(noop_waker_ref());
    fut.poll_unpin(&mut cx)
}

/// Drive a future to completion without an executor.
///
/// Anything that is still pending after one poll is waiting on a genuinely
/// asynchronous extension, which sync mode cannot serve.
pub(crate) fn run_sync<T>(mut fut: BoxFuture<'_, Result<T>>) -> Result<T> {
    match poll_once(&mut fut) {
        Poll::Ready(res) => res,
        Poll::Pending => Err(Error::new(ErrorKind::SyncAsync)),
    }
}
