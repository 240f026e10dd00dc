use sctools::cli::command;
use structopt::StructOpt;

fn main() {
    command::terminal_init();
    command::dis(command::SubcommandDis::from_args());
}
