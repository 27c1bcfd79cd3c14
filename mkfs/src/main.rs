//! `mkfs.voluta`: formats a fresh voluta volume (spec.md §4.5
//! "Formatting", §6, §14). Grounded on the teacher's `mkfs/src/main.rs`
//! argument-parsing style (hand-rolled `match` over `env::args()`,
//! `unwrap_or_else(|e| { eprintln!(...); exit(1) })`) and its
//! "filesystem already present, confirm overwrite" prompt, generalized
//! from the `FSFactory` multi-format dispatch (ext2 was the only
//! factory) to the single voluta format this tool now produces.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use utils::prompt::prompt;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// The name of the current program used in command line.
    prog: String,
    /// If true, print command line help.
    help: bool,
    /// The path to the volume file to create.
    volume_path: Option<PathBuf>,
    /// The size of the volume, in bytes.
    size: Option<u64>,
    /// The passphrase used to derive the super-block key, if given on
    /// the command line instead of interactively.
    passphrase: Option<String>,
    /// Skip the "volume already formatted?" confirmation prompt.
    force: bool,
}

fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some('T') | Some('t') => (&s[..s.len() - 1], 1024u64.pow(4)),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * mult)
}

fn parse_args() -> Args {
    let mut args: Args = Default::default();
    let mut iter = env::args();

    args.prog = iter.next().unwrap_or_else(|| "mkfs.voluta".to_owned());

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "-f" | "--force" => args.force = true,
            "-s" | "--size" => {
                let v = iter.next().unwrap_or_else(|| {
                    eprintln!("{}: --size requires an argument", args.prog);
                    exit(1);
                });
                args.size = Some(parse_size(&v).unwrap_or_else(|| {
                    eprintln!("{}: invalid size `{}`", args.prog, v);
                    exit(1);
                }));
            },
            "-p" | "--passphrase" => {
                args.passphrase = Some(iter.next().unwrap_or_else(|| {
                    eprintln!("{}: --passphrase requires an argument", args.prog);
                    exit(1);
                }));
            },
            _ => {
                args.volume_path = Some(PathBuf::from(arg));
            },
        }
    }

    args
}

fn print_usage(prog: &str) {
    println!("usage: {} [-f] [-s SIZE] [-p PASSPHRASE] <volume-path>", prog);
    println!("  -s, --size SIZE        volume size (bytes, or suffixed K/M/G/T); required");
    println!("  -p, --passphrase PASS  passphrase (prompted interactively if omitted)");
    println!("  -f, --force            skip the already-formatted confirmation prompt");
}

fn main() {
    let args = parse_args();

    if args.help {
        print_usage(&args.prog);
        return;
    }

    let volume_path = args.volume_path.unwrap_or_else(|| {
        eprintln!("{}: specify the path of the volume to create", args.prog);
        exit(1);
    });

    let size = args.size.unwrap_or_else(|| {
        eprintln!("{}: specify a volume size with --size", args.prog);
        exit(1);
    });

    if volume_path.exists() && !args.force {
        println!("{} already exists and may hold a voluta volume.", volume_path.display());
        let confirm = prompt(Some("Overwrite? (y/N) "), false)
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    let passphrase = args.passphrase.unwrap_or_else(|| {
        prompt(Some("Volume passphrase: "), true).unwrap_or_else(|| {
            eprintln!("{}: no passphrase given", args.prog);
            exit(1);
        })
    });

    let salt = storage::crypto::salt_for_volume(&volume_path);
    let outcome = storage::format::format(&volume_path, size, passphrase.as_bytes(), &salt)
        .unwrap_or_else(|e| {
            eprintln!("{}: {}: failed to format: {}", args.prog, volume_path.display(), e);
            exit(1);
        });

    println!(
        "{}: formatted voluta volume, uuid={}, {} uspace(s), root ino={}",
        args.prog,
        uuid::Uuid::from_bytes(outcome.uuid),
        outcome.uspaces_formatted,
        outcome.root_ino,
    );
}
