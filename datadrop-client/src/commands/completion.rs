use crate::{CommandContext, ExecutableCommand, RootCommand};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueHint};
use clap_complete::{Shell, generate};
use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

/// Generate shell completions.
#[derive(Parser)]
pub struct GenCompletionsCommand {
    #[clap(value_enum, value_hint = ValueHint::Other)]
    shell: Shell,

    /// Write the completions to this file instead of stdout.
    #[clap(short = 'o', long = "output", value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

impl ExecutableCommand for GenCompletionsCommand {
    async fn run(self, _context: &CommandContext) -> Result<()> {
        let mut cmd = RootCommand::command();
        let bin_name = env!("CARGO_PKG_NAME");
        let mut out: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("failed to create '{}'", path.display()))?,
            ),
            None => Box::new(io::stdout()),
        };

        eprintln!("Generating {} completions for {bin_name}...", self.shell);
        generate(self.shell, &mut cmd, bin_name, &mut out);
        out.flush()?;
        Ok(())
    }
}
