//! Archiving finished JobHandles and reading them back
//!
//! A pool archives every handle once all of them reached a terminal state. The ledger lives in the
//! workspace, so `autobsub clean` forgets it together with the scripts and logs.

pub mod archive;
pub mod load;
