use crate::command;
use crate::locker::Registry;
use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "reclaim",
    description = "Delete every expired lock record once"
)]
pub struct Options {}

pub struct Command {
    registry: Registry,
}

impl Command {
    pub fn new(registry: Registry) -> Self {
        Command { registry }
    }

    pub async fn run(self) -> Result<(), command::Error> {
        let result = self.registry.reclaim_now().await;
        self.registry.shutdown().await;

        let deleted = result?;
        println!("Reclaimed {deleted} expired lock(s)");
        Ok(())
    }
}
