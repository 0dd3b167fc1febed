//! `mfs` mounts a small block-device filesystem through FUSE.

use fuser::MountOption;
use mfs::device::Device;
use mfs::fs::Fs;
use mfs::fuse::FuseFs;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the backing device or image file.
    device: Option<PathBuf>,
    /// The directory the filesystem is mounted on.
    mountpoint: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args_os().skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some(s) if s.starts_with("--device=") => {
                res.device = Some(PathBuf::from(&s["--device=".len()..]));
            }
            _ => res.mountpoint = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command usage.
fn print_usage() {
    eprintln!("mfs: bad usage");
    eprintln!("Try 'mfs --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mfs --device=PATH mountpoint");
    println!();
    println!("Mounts the filesystem backed by the given device, formatting it on first use.");
    println!();
    println!("Options:");
    println!(" -h, --help:\tprints usage");
    println!(" --device=PATH:\tthe backing block device or image file");
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("mfs: error: {msg}");
    exit(1);
}

fn main() {
    env_logger::init();

    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let (Some(device), Some(mountpoint)) = (args.device, args.mountpoint) else {
        print_usage();
        exit(1);
    };

    let dev = Device::open(&device).unwrap_or_else(|e| {
        error(format_args!("{}: {e}", device.display()));
    });
    let fs = Fs::mount(dev).unwrap_or_else(|e| {
        error(format_args!("{}: cannot mount: {e}", device.display()));
    });

    let options = [MountOption::FSName("mfs".to_owned())];
    if let Err(e) = fuser::mount2(FuseFs::new(fs), &mountpoint, &options) {
        error(format_args!("{}: {e}", mountpoint.display()));
    }
}
