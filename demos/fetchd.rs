//! Demonstrates the fetch rendezvous end to end inside one process: a user
//! thread opens a virtual path that is missing from the host while the main
//! thread plays the helper, materialising the host file and acknowledging
//! the request.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use lazyfs::Error;
use lazyfs::LazyFs;
use lazyfs::MountParams;
use lazyfs::OpenFlags;
use log::info;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Backing host directory; its '...' listing must name the leaf of PATH
    host: PathBuf,
    /// Mount-relative path of a file directly under the root, e.g. /README
    path: String,
}

fn open_and_read(fs: &LazyFs, path: &str) -> Result<Vec<u8>, Error> {
    let req = fs.request();
    let mut cursor = fs.root();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        cursor = fs
            .lookup(&req, cursor, OsStr::new(segment))?
            .ok_or(Error::NoHelper)?;
    }
    let handle = fs.open(&req, cursor, OpenFlags::read_only())?;
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let got = handle.read(out.len() as u64, &mut buf)?;
        if got == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..got]);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let fs = Arc::new(lazyfs::mount(MountParams::from_path(&args.host)?)?);
    let helper = fs.open_helper()?;

    let user = {
        let fs = fs.clone();
        let path = args.path.clone();
        thread::spawn(move || open_and_read(&fs, &path))
    };

    let mut buf = [0u8; 64];
    let n = helper.read_request(&fs.request(), &mut buf)?;
    let message = std::str::from_utf8(&buf[..n - 1])?;
    info!("helper got request: {message}");
    let id: u64 = message
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .parse()?;

    if let Some(request) = helper.request(id) {
        let relative = request
            .path()
            .to_str()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_owned();
        info!("materialising {relative:?} in the host");
        // A real helper resolves the name to a remote resource; this one
        // just writes a stand-in.
        std::fs::write(args.host.join(relative), b"fetched on demand\n")?;
    }
    helper.close_request(id);

    let bytes = user.join().expect("user thread panicked")?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
