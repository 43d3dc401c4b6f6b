mod crossref;
mod features;
mod geometry;
mod ioutil;
mod items;
mod nyt;
mod progress;
mod report;
mod resolve;
mod series;
mod stats;
mod testing;

pub use crossref::*;
pub use features::*;
pub use geometry::*;
pub use ioutil::*;
pub use items::*;
pub use nyt::*;
pub use progress::*;
pub use report::*;
pub use resolve::*;
pub use series::*;
pub use stats::*;
pub use testing::*;
