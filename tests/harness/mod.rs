//! Integration Test Harness
//!
//! Test infrastructure for the adjudication engine:
//! - `TestTable` - A seeded `Engine` with one encounter loaded
//! - `party` - Stock participants with stats, weapons and reactions
//!
//! # Example
//!
//! ```rust,ignore
//! use harness::{fighter, goblin, TestTable};
//!
//! #[test]
//! fn test_fighter_goes_first() {
//!     let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
//!     table.start(&[("f", 18), ("g", 12)]);
//!     assert_eq!(table.current_actor().as_deref(), Some("f"));
//! }
//! ```

#![allow(dead_code)]

mod party;
mod table;

pub use party::{fighter, goblin, mage, rogue, wizard};
pub use table::TestTable;
