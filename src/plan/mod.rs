//! Frame and branch planning (spec §4.3, §4.4): the products the code
//! generator consumes to lower a rectified function.

pub mod branch;
pub mod frame;

pub use branch::{plan_branches, BranchInfo, BranchLabels, Label};
pub use frame::{plan_frame, FrameInfo};
