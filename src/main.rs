use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::{error, info};

use photovault::scanner::ContentHash;
use photovault::{logging, Config, Library, PhotoId};

enum Command {
    Import(Vec<PathBuf>),
    Index(String),
    Thumbnail { photo: i64, out: Option<PathBuf> },
    Export { photo: i64, dest: PathBuf, size: Option<(u32, u32)> },
    Check(String),
}

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut out = None;
    let mut size = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photovault {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let value = args.get(i + 1).context("--config requires a path argument")?;
                config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--out" | "-o" => {
                let value = args.get(i + 1).context("--out requires a path argument")?;
                out = Some(PathBuf::from(value));
                i += 1;
            }
            "--size" | "-s" => {
                let value = args.get(i + 1).context("--size requires WIDTHxHEIGHT")?;
                size = Some(parse_size(value)?);
                i += 1;
            }
            arg if arg.starts_with('-') => bail!("Unknown argument: {}", arg),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let Some((name, rest)) = positional.split_first() else {
        print_help();
        std::process::exit(1);
    };

    let photo_id = |value: Option<&String>| -> Result<i64> {
        value
            .context("missing photo id")?
            .parse()
            .context("photo id must be a number")
    };

    let command = match name.as_str() {
        "import" if !rest.is_empty() => Command::Import(rest.iter().map(PathBuf::from).collect()),
        "index" if rest.len() == 1 => Command::Index(rest[0].clone()),
        "thumbnail" => Command::Thumbnail {
            photo: photo_id(rest.first())?,
            out,
        },
        "export" if rest.len() == 2 => Command::Export {
            photo: photo_id(rest.first())?,
            dest: PathBuf::from(&rest[1]),
            size,
        },
        "check" if rest.len() == 1 => Command::Check(rest[0].clone()),
        other => bail!("Invalid command or arguments: {}", other),
    };

    Ok(Cli { config_path, command })
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("invalid size '{}', expected WIDTHxHEIGHT", value))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}

fn print_help() {
    println!(
        r#"photovault - content-addressed photo archive

USAGE:
    photovault [OPTIONS] <COMMAND>

COMMANDS:
    import FILE...              Copy files into the default managed volume
    index VOLUME                Register every image on an external volume
    thumbnail PHOTO [--out F]   Produce (or reuse) a photo's thumbnail
    export PHOTO DEST [--size WxH]
                                Render a photo with its edits
    check HASH                  Verify the recorded locations of a file

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOVAULT_CONFIG   Path to config file (overrides default location)
    PHOTOVAULT_LOG      Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photovault/config.toml"#
    );
}

fn main() -> Result<()> {
    let cli = parse_args()?;

    let _ = logging::init(None);

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;
    let jpeg_quality = config.export.jpeg_quality;

    let mut library = Library::open(config).context("Failed to open archive")?;

    match cli.command {
        Command::Import(paths) => {
            let mut failed = 0;
            for path in &paths {
                match library.import_file(path) {
                    Ok(id) => println!("{}\t{}", id, path.display()),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Import failed");
                        eprintln!("{}: {}", path.display(), e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} files failed to import", failed, paths.len());
            }
        }
        Command::Index(volume) => {
            let summary = library.index_external(&volume)?;
            println!(
                "scanned {}, new files {}, new locations {}, new photos {}, failed {}",
                summary.scanned, summary.new_files, summary.new_locations, summary.new_photos, summary.failed
            );
        }
        Command::Thumbnail { photo, out } => {
            let mut info = library.photo(PhotoId(photo))?;
            let bitmap = library.thumbnail(&mut info);
            println!("{:?}\t{}x{}", info.thumbnail_state(), bitmap.width(), bitmap.height());
            if let Some(out) = out {
                photovault::export::write_image(&bitmap, &out, jpeg_quality)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
            }
        }
        Command::Export { photo, dest, size } => {
            library.export_photo(PhotoId(photo), &dest, size)?;
            info!(dest = %dest.display(), "Export complete");
            println!("{}", dest.display());
        }
        Command::Check(hash) => {
            let hash: ContentHash = hash.parse()?;
            for check in library.check_locations(&hash)? {
                println!("{:?}\t{}\t{}", check.status, check.volume, check.rel_path.display());
            }
        }
    }

    Ok(())
}
