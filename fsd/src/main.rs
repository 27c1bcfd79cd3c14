//! `voluta-fsd`: the FUSE bridge daemon. Listens on a mount-control
//! Unix-domain socket (spec.md §6, §13) and serves at most one mounted
//! volume at a time — the shared `Mutex<Option<SessionUnmounter>>` is
//! the single mutex the whole design allows (spec.md §5).

use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;
use fuser::{MountOption, Session, SessionUnmounter};

use fsd::control::{ControlListener, Reply, Request};
use fsd::VolutaFs;

#[derive(Parser)]
#[command(name = "voluta-fsd", about = "voluta FUSE bridge daemon")]
struct Cli {
    /// Path of the mount-control Unix-domain socket to listen on.
    #[arg(long)]
    control: PathBuf,

    /// File descriptor to read the volume passphrase from (one read,
    /// at startup, reused for every MOUNT request this daemon serves).
    #[arg(long)]
    passphrase_fd: RawFd,
}

struct MountState {
    unmounter: Option<SessionUnmounter>,
}

fn read_passphrase(fd: RawFd) -> Vec<u8> {
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).unwrap_or_else(|e| {
        eprintln!("voluta-fsd: failed to read passphrase: {e}");
        exit(1);
    });
    while buf.last() == Some(&b'\n') {
        buf.pop();
    }
    buf
}

/// Mounts and builds a session ready to `.run()`. Kept separate from
/// running it so the control loop can reply only once the mount has
/// actually succeeded, instead of racing the background `.run()` call.
fn build_session(volume: &Path, mountpoint: &Path, passphrase: &[u8]) -> std::io::Result<Session<VolutaFs>> {
    let salt = storage::crypto::salt_for_volume(volume);
    let dispatcher = storage::mount::mount(volume, passphrase, &salt)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let ops = ops::Operations::new(dispatcher);
    let fs = VolutaFs::new(ops);
    let options = [MountOption::FSName("voluta".into()), MountOption::DefaultPermissions];
    Session::new(fs, mountpoint, &options)
}

fn run_session(mut session: Session<VolutaFs>, state: Arc<Mutex<MountState>>) {
    if let Err(e) = session.run() {
        log::error!("FUSE session ended with an error: {e}");
    }
    state.lock().unwrap().unmounter = None;
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let passphrase = read_passphrase(cli.passphrase_fd);

    let listener = ControlListener::bind(&cli.control).unwrap_or_else(|e| {
        eprintln!("voluta-fsd: {}: {}", cli.control.display(), e);
        exit(1);
    });

    let state = Arc::new(Mutex::new(MountState { unmounter: None }));

    loop {
        let mut conn = match listener.accept() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("control accept failed: {e}");
                continue;
            }
        };
        let request = match conn.recv() {
            Ok(r) => r,
            Err(e) => {
                log::warn!("control recv failed: {e}");
                continue;
            }
        };

        match request {
            Request::Status => {
                let mounted = state.lock().unwrap().unmounter.is_some();
                let _ = conn.reply(&Reply::Status { mounted });
            }
            Request::Mount { volume, mountpoint, flags: _ } => {
                if state.lock().unwrap().unmounter.is_some() {
                    let _ = conn.reply(&Reply::Error { message: "already mounted".into() });
                    continue;
                }
                let (volume_path, mountpoint_path) = (PathBuf::from(&volume), PathBuf::from(&mountpoint));
                match build_session(&volume_path, &mountpoint_path, &passphrase) {
                    Ok(mut session) => {
                        state.lock().unwrap().unmounter = Some(session.unmount_callable());
                        let _ = conn.reply_mount_fd(std::os::fd::AsRawFd::as_raw_fd(&std::io::stdin()));
                        let state = Arc::clone(&state);
                        thread::spawn(move || run_session(session, state));
                    }
                    Err(e) => {
                        let _ = conn.reply(&Reply::Error { message: e.to_string() });
                    }
                }
            }
            Request::Umount => {
                if let Some(unmounter) = state.lock().unwrap().unmounter.take() {
                    let mut unmounter = unmounter;
                    let _ = unmounter.unmount();
                    let _ = conn.reply(&Reply::Unmounted);
                } else {
                    let _ = conn.reply(&Reply::Error { message: "not mounted".into() });
                }
            }
            Request::Halt => {
                if let Some(unmounter) = state.lock().unwrap().unmounter.take() {
                    let mut unmounter = unmounter;
                    let _ = unmounter.unmount();
                }
                let _ = conn.reply(&Reply::Halted);
                break;
            }
        }
    }
}
