//! `voluta`: the CLI front-end (spec.md §6, §14) — `--volume --mount
//! --size --passphrase-fd`, formatting a fresh volume when `--size` is
//! given, then mounting it and serving FUSE requests in-process until
//! a clean unmount. Exits 0 on clean unmount, non-zero on fatal I/O or
//! crypto error, matching `mkfs/src/main.rs`'s `unwrap_or_else(|e| {
//! eprintln!(...); exit(1) })` idiom.

use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use fuser::{MountOption, Session};

use fsd::VolutaFs;
use utils::prompt::prompt;

#[derive(Parser)]
#[command(name = "voluta", about = "mount a voluta encrypted volume")]
struct Cli {
    /// Path to the volume file.
    #[arg(long)]
    volume: PathBuf,

    /// Directory to mount the volume on.
    #[arg(long)]
    mount: PathBuf,

    /// Creates a fresh volume of this size (in bytes) before mounting.
    #[arg(long)]
    size: Option<u64>,

    /// File descriptor to read the passphrase from. Falls back to an
    /// interactive, hidden-echo terminal prompt when omitted.
    #[arg(long)]
    passphrase_fd: Option<i32>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, on_shutdown_signal as usize);
        libc::signal(libc::SIGINT, on_shutdown_signal as usize);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
}

fn read_passphrase(fd: Option<i32>) -> Vec<u8> {
    if let Some(fd) = fd {
        use std::io::Read;
        use std::os::fd::FromRawFd;
        let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap_or_else(|e| {
            eprintln!("voluta: failed to read passphrase from fd {fd}: {e}");
            exit(1);
        });
        while buf.last() == Some(&b'\n') {
            buf.pop();
        }
        buf
    } else {
        prompt(Some("Volume passphrase: "), true).unwrap_or_default().into_bytes()
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    install_signal_handlers();

    let passphrase = read_passphrase(cli.passphrase_fd);
    let salt = storage::crypto::salt_for_volume(&cli.volume);

    if let Some(size) = cli.size {
        storage::format::format(&cli.volume, size, &passphrase, &salt).unwrap_or_else(|e| {
            eprintln!("voluta: {}: failed to format: {}", cli.volume.display(), e);
            exit(1);
        });
    }

    let dispatcher = storage::mount::mount(&cli.volume, &passphrase, &salt).unwrap_or_else(|e| {
        eprintln!("voluta: {}: failed to mount: {}", cli.volume.display(), e);
        exit(1);
    });
    let ops = ops::Operations::new(dispatcher);
    let fs = VolutaFs::new(ops);

    let options = [MountOption::FSName("voluta".into()), MountOption::DefaultPermissions];
    let mut session = Session::new(fs, &cli.mount, &options).unwrap_or_else(|e| {
        eprintln!("voluta: {}: failed to mount FUSE channel: {}", cli.mount.display(), e);
        exit(1);
    });

    let mut unmounter = session.unmount_callable();
    let watcher = thread::spawn(move || {
        while !SHUTDOWN.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(200));
        }
        let _ = unmounter.unmount();
    });

    let result = session.run();
    SHUTDOWN.store(true, Ordering::SeqCst);
    let _ = watcher.join();

    result.unwrap_or_else(|e| {
        eprintln!("voluta: FUSE session ended with an error: {e}");
        exit(1);
    });
}
