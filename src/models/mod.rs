mod analysis;
mod anomaly;
mod data_ops;
mod line;

pub use analysis::*;
pub use anomaly::*;
pub use data_ops::*;
pub use line::*;
