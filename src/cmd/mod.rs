//! CLI command implementations.
//!
//! | Module     | Commands handled      |
//! |------------|-----------------------|
//! | `generate` | `Generate`            |
//! | `inspect`  | `Classify`, `Repair`  |
//! | `serve`    | `Serve`               |
//! | `config`   | `Config`              |

pub mod config;
pub mod generate;
pub mod inspect;
pub mod serve;

pub use config::cmd_config;
pub use generate::{GenerateArgs, cmd_generate};
pub use inspect::{cmd_classify, cmd_repair};
pub use serve::cmd_serve;
