//! Bounded work queue
//!
//! A multi-consumer queue over a bounded tokio channel. `push` waits while the
//! queue is full, `pop` waits while it is empty and returns `None` once
//! `finish` has been called and every queued item has been taken. `close`
//! is for when the consumers are gone: pending and later pushes fail.

use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Returned by `push` after `finish`; carries the rejected item back
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Display for QueueClosed<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "work queue already finished")
	}
}

impl<T: fmt::Debug> std::error::Error for QueueClosed<T> {}

pub struct WorkQueue<T> {
	tx: Mutex<Option<mpsc::Sender<T>>>,
	rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
	capacity: usize,
}

impl<T: Send> WorkQueue<T> {
	/// Create a queue holding at most `capacity` items (at least one)
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		let (tx, rx) = mpsc::channel(capacity);
		WorkQueue { tx: Mutex::new(Some(tx)), rx: tokio::sync::Mutex::new(rx), capacity }
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Enqueue an item, waiting for free space
	pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
		let tx = {
			let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
			guard.clone()
		};
		match tx {
			Some(tx) => tx.send(item).await.map_err(|e| QueueClosed(e.0)),
			None => Err(QueueClosed(item)),
		}
	}

	/// Take the next item; `None` once finished and drained
	pub async fn pop(&self) -> Option<T> {
		self.rx.lock().await.recv().await
	}

	/// Signal that no more items will be pushed
	pub fn finish(&self) {
		let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
		guard.take();
	}

	/// Stop accepting items and wake producers waiting for space
	///
	/// Items already queued can still be popped.
	pub async fn close(&self) {
		self.finish();
		self.rx.lock().await.close();
	}
}


// vim: ts=4
