//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `train`  | `Train`          |
//! | `status` | `Status`         |
//! | `config` | `Config`         |

pub mod config;
pub mod serve;
pub mod status;
pub mod train;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use status::cmd_status;
pub use train::cmd_train;
