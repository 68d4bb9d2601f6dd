use std::process;

use taxor::classify::{parse_command_line, run_classification};
use taxor::daemon;
use taxor::errors::ClassifyResult;
use taxor::index::IndexBundle;

fn main() {
    let opts = match parse_command_line(std::env::args().collect()) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("classify: {}", err);
            process::exit(err.exit_code());
        }
    };

    let result: ClassifyResult<()> = if opts.daemon_mode {
        daemon::run_daemon(opts)
    } else {
        IndexBundle::load(
            &opts.index_filename,
            &opts.taxonomy_filename,
            &opts.options_filename,
            opts.use_memory_mapping,
        )
        .and_then(|bundle| run_classification(&opts, &bundle))
    };

    if let Err(err) = result {
        eprintln!("classify: {}", err);
        process::exit(err.exit_code());
    }
}
