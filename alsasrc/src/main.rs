mod config;
mod event_loop;
mod run;
mod signal;
mod sink;

use std::process::ExitCode;

use structopt::StructOpt;

use run::Opt;

fn main() -> ExitCode {
    env_logger::init();

    if let Some(config) = config::read() {
        config::load_into_env(&config);
    }

    let opt = Opt::from_args();

    match run::run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
