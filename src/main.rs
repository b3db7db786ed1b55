use clap::error::ErrorKind;
use clap::{CommandFactory, FromArgMatches, Parser};
use log::{debug, LevelFilter};
use mkbfb::assembler::{Assembler, BuildOptions, EmissionOrder};
use mkbfb::dump::{self, DumpOptions, DEFAULT_EXTRACT_PREFIX};
use mkbfb::image::ImageSource;
use mkbfb::image_type::{ImageType, MAX_CLI_IMAGE_VERSION};
use simple_logger::SimpleLogger;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "mkbfb",
    version,
    about = "Create or dump a BlueField boot stream",
    override_usage = "mkbfb [OPTIONS] [IMAGE OPTIONS] [INFILE] [INFILE2] OUTFILE\n       mkbfb -d|-x [OPTIONS] INFILE"
)]
struct Cli {
    /// Print listing of images within INFILE
    #[arg(short, long)]
    dump: bool,
    /// Extract images from INFILE and write to files
    #[arg(short = 'x', long)]
    extract: bool,
    /// Prefix for files containing extracted images
    #[arg(short, long, value_name = "PFX", default_value = DEFAULT_EXTRACT_PREFIX)]
    prefix: String,
    /// Provide more verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Expert mode: emit images in the order specified on the command line
    #[arg(short, long)]
    expert: bool,
    /// Print the -d listing as JSON
    #[arg(long)]
    json: bool,
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

/// A `--<type>[-vN]` option, in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageOption {
    name:   String,
    source: String,
}

#[derive(Debug)]
enum Mode {
    Dump {
        input:   PathBuf,
        options: DumpOptions,
    },
    Build {
        inputs:  Vec<PathBuf>,
        output:  PathBuf,
        images:  Vec<ImageOption>,
        options: BuildOptions,
    },
}

impl Cli {
    fn into_mode(self, images: Vec<ImageOption>) -> Result<Mode, String> {
        let Cli { dump, extract, prefix, verbose, expert, json, mut files } = self;

        if dump || extract {
            if files.len() > 1 {
                return Err("no output file allowed with -d/-x".into());
            }
            if expert {
                return Err("-e not applicable with -d/-x".into());
            }
            if !images.is_empty() {
                return Err("cannot specify images with -d/-x".into());
            }
            if json && !dump {
                return Err("--json requires -d".into());
            }
            let input = files.pop().ok_or("must specify an input file with -d/-x")?;
            let options = DumpOptions {
                list: dump,
                verbose,
                json,
                extract_prefix: extract.then_some(prefix),
            };
            return Ok(Mode::Dump { input, options });
        }

        if json {
            return Err("--json requires -d".into());
        }
        if files.len() > 3 {
            return Err("only two input and one output file allowed".into());
        }
        let output = files.pop().ok_or("must specify a file")?;
        if files.is_empty() && images.is_empty() {
            return Err("must specify input .bfb or at least one image option with output file".into());
        }
        if expert && !files.is_empty() {
            return Err("input file not permitted with -e".into());
        }
        let order = if expert { EmissionOrder::Expert } else { EmissionOrder::Table };
        Ok(Mode::Build { inputs: files, output, images, options: BuildOptions { order } })
    }
}

fn main() -> ExitCode {
    let (args, images) = split_image_options(std::env::args_os().collect())
        .unwrap_or_else(|msg| command().error(ErrorKind::InvalidValue, msg).exit());
    let matches = command().get_matches_from(args);
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let level = if cli.verbose { LevelFilter::Info } else { LevelFilter::Warn };
    let _ = SimpleLogger::new().with_level(level).env().init();

    let mode = cli
        .into_mode(images)
        .unwrap_or_else(|msg| command().error(ErrorKind::ArgumentConflict, msg).exit());

    match run(mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mkbfb: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(mode: Mode) -> mkbfb::Result<()> {
    match mode {
        // ── Dump / extract ───────────────────────────────────────────────────
        Mode::Dump { input, options } => {
            let reader = BufReader::new(File::open(&input)?);
            let count = dump::dump_stream(reader, io::stdout().lock(), &options)?;
            debug!("{count} image(s) in {}", input.display());
        }

        // ── Build ────────────────────────────────────────────────────────────
        Mode::Build { inputs, output, images, options } => {
            let mut asm = Assembler::new(options);
            for input in &inputs {
                asm.add_stream_file(input)?;
            }
            for image in &images {
                asm.add_source(&image.name, &ImageSource::from(image.source.as_str()))?;
            }
            asm.write_file(&output)?;
        }
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn command() -> clap::Command {
    Cli::command().after_help(image_options_help())
}

/// Every accepted image option name: `<type>` and `<type>-v0` ..= `<type>-vMAX`.
fn image_option_names() -> Vec<String> {
    ImageType::all()
        .flat_map(|ty| {
            std::iter::once(ty.name().to_owned())
                .chain((0..=MAX_CLI_IMAGE_VERSION).map(move |v| format!("{}-v{v}", ty.name())))
        })
        .collect()
}

fn image_options_help() -> String {
    let mut help = format!(
        "Image options:\n  \
         Images specified on the command line replace images of the same type and\n  \
         version within the input files. IMAGE is either the name of a file holding\n  \
         the image data (e.g. --image=vmlinux) or a literal string prefixed with an\n  \
         equals sign (e.g. --boot-args=\"=debug isolcpus=10\"). Append -vN to an option\n  \
         name (N = 0..={MAX_CLI_IMAGE_VERSION}) to set the image version; the default is 0.\n\n"
    );
    for ty in ImageType::all() {
        help.push_str(&format!("  --{:<24} {}\n", format!("{}=IMAGE", ty.name()), ty.description()));
    }
    help
}

/// Pull image options out of `args` before clap sees them, so their
/// relative order survives. Both `--name=IMAGE` and `--name IMAGE` work.
fn split_image_options(args: Vec<OsString>) -> Result<(Vec<OsString>, Vec<ImageOption>), String> {
    let names = image_option_names();
    let mut rest = Vec::with_capacity(args.len());
    let mut images = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            rest.push(arg);
            continue;
        };
        if text == "--" {
            rest.push(arg);
            rest.extend(args.by_ref());
            break;
        }
        let Some(option) = text.strip_prefix("--") else {
            rest.push(arg);
            continue;
        };
        let (name, inline) = match option.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None                => (option, None),
        };
        if !names.iter().any(|n| n == name) {
            rest.push(arg);
            continue;
        }
        let source = match inline {
            Some(value) => value.to_owned(),
            None => args
                .next()
                .and_then(|v| v.into_string().ok())
                .ok_or_else(|| format!("option --{name} requires an IMAGE argument"))?,
        };
        images.push(ImageOption { name: name.to_owned(), source });
    }
    Ok((rest, images))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn mode(args: &[&str]) -> Result<Mode, String> {
        let (rest, images) = split_image_options(os(args)).unwrap();
        Cli::try_parse_from(rest).map_err(|e| e.to_string())?.into_mode(images)
    }

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn image_options_keep_their_order() {
        let (rest, images) = split_image_options(os(&[
            "mkbfb", "--image=vmlinux", "-e", "--boot-args", "=console=ttyAMA0", "out.bfb",
        ]))
        .unwrap();
        assert_eq!(rest, os(&["mkbfb", "-e", "out.bfb"]));
        assert_eq!(
            images,
            vec![
                ImageOption { name: "image".into(), source: "vmlinux".into() },
                ImageOption { name: "boot-args".into(), source: "=console=ttyAMA0".into() },
            ]
        );
    }

    #[test]
    fn versioned_options_are_bounded() {
        let (rest, images) = split_image_options(os(&["mkbfb", "--bl2-v2=a", "--bl2-v3=b"])).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "bl2-v2");
        assert_eq!(rest, os(&["mkbfb", "--bl2-v3=b"]));
    }

    #[test]
    fn arguments_after_double_dash_are_untouched() {
        let (rest, images) = split_image_options(os(&["mkbfb", "--", "--bl2=x"])).unwrap();
        assert!(images.is_empty());
        assert_eq!(rest, os(&["mkbfb", "--", "--bl2=x"]));
    }

    #[test]
    fn missing_image_argument() {
        let err = split_image_options(os(&["mkbfb", "--bl31"])).unwrap_err();
        assert!(err.contains("--bl31"), "{err}");
    }

    #[test]
    fn build_modes() {
        match mode(&["mkbfb", "--sys==PN1", "out.bfb"]).unwrap() {
            Mode::Build { inputs, output, images, options } => {
                assert!(inputs.is_empty());
                assert_eq!(output, PathBuf::from("out.bfb"));
                assert_eq!(images.len(), 1);
                assert_eq!(options.order, EmissionOrder::Table);
            }
            other => panic!("unexpected {other:?}"),
        }
        match mode(&["mkbfb", "a.bfb", "b.bfb", "out.bfb"]).unwrap() {
            Mode::Build { inputs, .. } => assert_eq!(inputs.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match mode(&["mkbfb", "-e", "--bl2=x", "out.bfb"]).unwrap() {
            Mode::Build { options, .. } => assert_eq!(options.order, EmissionOrder::Expert),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dump_modes() {
        match mode(&["mkbfb", "-x", "-p", "out/", "in.bfb"]).unwrap() {
            Mode::Dump { input, options } => {
                assert_eq!(input, PathBuf::from("in.bfb"));
                assert!(!options.list);
                assert_eq!(options.extract_prefix.as_deref(), Some("out/"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match mode(&["mkbfb", "-dv", "in.bfb"]).unwrap() {
            Mode::Dump { options, .. } => {
                assert!(options.list && options.verbose);
                assert_eq!(options.extract_prefix, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejected_combinations() {
        let cases: &[(&[&str], &str)] = &[
            (&["mkbfb", "-d", "in.bfb", "out.bfb"], "no output file"),
            (&["mkbfb", "-d", "-e", "in.bfb"], "-e not applicable"),
            (&["mkbfb", "-x", "--bl2=a", "in.bfb"], "cannot specify images"),
            (&["mkbfb", "-d"], "must specify an input file"),
            (&["mkbfb", "a", "b", "c", "d"], "only two input"),
            (&["mkbfb"], "must specify a file"),
            (&["mkbfb", "out.bfb"], "at least one image option"),
            (&["mkbfb", "-e", "--bl2=a", "in.bfb", "out.bfb"], "not permitted with -e"),
            (&["mkbfb", "--json", "--bl2=a", "out.bfb"], "--json requires -d"),
        ];
        for (args, expected) in cases {
            let err = mode(args).unwrap_err();
            assert!(err.contains(expected), "{args:?}: {err}");
        }
    }

    #[test]
    fn help_lists_every_image_type() {
        let help = image_options_help();
        for ty in ImageType::all() {
            assert!(help.contains(&format!("--{}=IMAGE", ty.name())), "{}", ty.name());
        }
    }
}
