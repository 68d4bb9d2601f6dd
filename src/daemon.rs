use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process;

use crate::classify::{parse_command_line, run_classification, ClassifyOptions};
use crate::errors::{ClassifyError, ClassifyResult};
use crate::index::IndexBundle;

const PID_FILE: &str = "/tmp/classify.pid";
const CONTROL_FIFO: &str = "/tmp/classify_stdin";

fn make_fifo(path: &str) -> ClassifyResult<()> {
    let c_path = CString::new(path)
        .map_err(|_| ClassifyError::Os(format!("invalid fifo path: {}", path)))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(ClassifyError::Os(format!(
                "unable to create fifo {}: {}",
                path, err
            )));
        }
    }
    Ok(())
}

fn remove_blocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK);
    }
}

/// Serve one classification request over its per-request FIFOs. Requests
/// with no input files read from the request stdin FIFO; kraken output
/// defaults to the request stdout FIFO.
fn serve_request(opts: &ClassifyOptions, bundle: &IndexBundle, request_id: u32) -> ClassifyResult<()> {
    let stdin_fifo = format!("/tmp/classify_{}_stdin", request_id);
    let stdout_fifo = format!("/tmp/classify_{}_stdout", request_id);
    make_fifo(&stdin_fifo)?;
    make_fifo(&stdout_fifo)?;
    println!("PID: {}", request_id);

    let mut opts = opts.clone();
    if opts.kraken_output_filename.is_none() {
        opts.kraken_output_filename = Some(stdout_fifo.clone());
    }
    if opts.input_files.is_empty() {
        opts.input_files.push(stdin_fifo.clone());
    }

    let result = run_classification(&opts, bundle);

    let _ = fs::remove_file(&stdin_fifo);
    let _ = fs::remove_file(&stdout_fifo);
    println!("DONE");
    result
}

fn load_if_missing<'a>(
    indexes: &'a mut HashMap<String, IndexBundle>,
    opts: &ClassifyOptions,
) -> ClassifyResult<&'a IndexBundle> {
    if !indexes.contains_key(&opts.index_filename) {
        let bundle = IndexBundle::load(
            &opts.index_filename,
            &opts.taxonomy_filename,
            &opts.options_filename,
            opts.use_memory_mapping,
        )?;
        indexes.insert(opts.index_filename.clone(), bundle);
    }
    Ok(&indexes[&opts.index_filename])
}

/// FIFO request loop. The first request comes from the launch options;
/// further requests arrive as `classify` command lines on the control FIFO.
/// `PING` answers `OK`, `STOP` shuts the loop down. Loaded index bundles
/// are cached by index path across requests.
pub fn run_daemon(initial_opts: ClassifyOptions) -> ClassifyResult<()> {
    fs::write(PID_FILE, format!("{}\n", process::id()))
        .map_err(|e| ClassifyError::Os(format!("unable to write {}: {}", PID_FILE, e)))?;
    make_fifo(CONTROL_FIFO)?;

    // Open the control FIFO read end non-blocking, hold a write end so the
    // reader never sees EOF between clients, then restore blocking reads.
    let control = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(CONTROL_FIFO)
        .map_err(|e| ClassifyError::Os(format!("unable to open {}: {}", CONTROL_FIFO, e)))?;
    let _keepalive = OpenOptions::new()
        .write(true)
        .open(CONTROL_FIFO)
        .map_err(|e| ClassifyError::Os(format!("unable to open {}: {}", CONTROL_FIFO, e)))?;
    remove_blocking(control.as_raw_fd());
    let mut control = BufReader::new(control);

    let mut indexes: HashMap<String, IndexBundle> = HashMap::new();
    let mut opts = initial_opts;

    loop {
        match load_if_missing(&mut indexes, &opts) {
            Ok(bundle) => {
                if let Err(e) = serve_request(&opts, bundle, process::id()) {
                    eprintln!("classify: {}", e);
                }
            }
            Err(e) => eprintln!("classify: {}", e),
        }

        let mut line = String::new();
        let stop = loop {
            line.clear();
            control.read_line(&mut line)?;
            if line.len() < 2 {
                continue;
            }
            if line == "PING\n" {
                eprintln!("OK");
                continue;
            }
            if line == "STOP\n" {
                eprintln!("OK");
                break true;
            }
            break false;
        };
        if stop {
            break;
        }

        let args: Vec<String> = std::iter::once("classify".to_string())
            .chain(line.split_whitespace().map(str::to_string))
            .collect();
        opts = parse_command_line(args)?;
    }

    let _ = fs::remove_file(CONTROL_FIFO);
    let _ = fs::remove_file(PID_FILE);
    Ok(())
}
