//! `xacto` is the core of a networked multi-version transactional
//! key-value store. Clients open long-lived TCP sessions; each session is
//! exactly one transaction issuing PUT and GET operations and ending with
//! a COMMIT that either succeeds or aborts. Concurrent transactions are
//! serializable, with the serialization order equal to the order of
//! transaction-ID assignment.
//!
//!
//! VERSIONS
//! ========
//! The store keeps, per key, a chain of versions ordered by the ID of the
//! transaction that created them. A version is "committed", "pending" or
//! "aborted" according to its creator's status. For example, after three
//! transactions touched the keys a and b:
//!
//! ```text
//! a:  [a1 committed] [a2 pending] [a3 pending]
//! b:  [b2 pending]
//! ```
//!
//! A garbage collection pass runs at the start of every operation on a
//! chain: all committed versions except the newest are dropped, and an
//! aborted version takes itself and every later version with it, aborting
//! their still-pending creators. A collected chain is therefore at most
//! one committed version followed by pending versions in strictly
//! increasing creator-ID order.
//!
//!
//! ISOLATION
//! =========
//! A write is only permitted if the performing transaction's ID is greater
//! than or equal to every creator ID already in the chain; writing behind
//! a later transaction aborts the writer, which keeps every chain
//! consistent with the ID order. Writing behind pending versions makes
//! the writer dependent on each of their creators: it cannot commit until
//! they have all reached a terminal state, and it aborts if any of them
//! aborts. Reads record a version carrying the observed value, so later
//! writers become dependent on earlier readers the same way.
//!
//! Together this yields serializability with ID order as the serial
//! schedule: a transaction commits only once every earlier transaction
//! whose effects it may have observed has committed before it.
//!
//! ## Getting started
//!
//! ```rust
//! use xacto::data::{Blob, Key};
//! use xacto::store::Store;
//! use xacto::transaction::{Status, TransactionManager};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let manager = TransactionManager::new();
//!     let store = Store::new();
//!
//!     let writer = manager.begin();
//!     assert_eq!(store.put(&writer, Key::new(Blob::new(b"k")), Blob::new(b"v")), Status::Pending);
//!     assert_eq!(writer.commit().await, Status::Committed);
//!
//!     let reader = manager.begin();
//!     let (status, value) = store.get(&reader, Key::new(Blob::new(b"k")));
//!     assert_eq!(status, Status::Pending);
//!     assert_eq!(value, Blob::new(b"v"));
//!     assert_eq!(reader.commit().await, Status::Committed);
//! }
//! ```

pub mod data;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transaction;
