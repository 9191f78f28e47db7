mod extract;
mod inspect;

pub use extract::*;
pub use inspect::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
