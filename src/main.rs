use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moondream::core::vision::preprocess;
use moondream::envconfig::{self, RuntimeConfig};
use moondream::infra::{archive, codec, storage};
use moondream::{BpeTokenizer, MergePolicy, PreprocessConfig, TokenId, Tokenizer};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "moondream")]
#[command(version)]
#[command(about = "Inspect and prepare on-device image captioning models", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a MOON model archive, plain or gzipped
    Unpack {
        archive: PathBuf,
        /// Defaults to the archive path without its extensions
        dest: Option<PathBuf>,
    },
    /// Print the token ids of TEXT
    Tokenize {
        #[arg(short, long)]
        model: String,
        #[arg(long, value_enum, default_value = "first-match")]
        policy: PolicyArg,
        text: String,
    },
    /// Print the text of token IDS
    Detokenize {
        #[arg(short, long)]
        model: String,
        #[arg(required = true)]
        ids: Vec<u32>,
    },
    /// Show how an image would be tiled into patches
    Tile {
        image: PathBuf,
        #[arg(long, default_value_t = 378)]
        patch_size: u32,
        #[arg(long)]
        max_image_size: Option<u32>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    FirstMatch,
    LowestRank,
}

impl From<PolicyArg> for MergePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FirstMatch => MergePolicy::FirstMatch,
            PolicyArg::LowestRank => MergePolicy::LowestRank,
        }
    }
}

/// Model arguments are paths, or names below `MOONDREAM_MODELS`.
fn resolve_model(model: &str) -> Result<PathBuf> {
    let direct = Path::new(model);
    let path = if direct.exists() {
        direct.to_path_buf()
    } else {
        envconfig::models_dir().join(model)
    };
    Ok(storage::ModelAssets::resolve(&path)?)
}

fn load_tokenizer(model: &str, policy: MergePolicy) -> Result<BpeTokenizer> {
    let dir = resolve_model(model)?;
    let config = storage::read_tokenizer(&dir)
        .with_context(|| format!("reading tokenizer of {}", dir.display()))?;
    Ok(BpeTokenizer::from_config(&config)?.with_policy(policy))
}

fn unpack(archive_path: &Path, dest: Option<PathBuf>) -> Result<()> {
    let dest = dest.unwrap_or_else(|| archive::unpack_dir(archive_path));
    let written = archive::unpack(archive_path, &dest)?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

fn tokenize(model: &str, policy: MergePolicy, text: &str) -> Result<()> {
    let tokenizer = load_tokenizer(model, policy)?;
    let ids = tokenizer.encode(text)?;
    let ids: Vec<String> = ids.iter().map(TokenId::to_string).collect();
    println!("{}", ids.join(" "));
    Ok(())
}

fn detokenize(model: &str, ids: &[u32]) -> Result<()> {
    let tokenizer = load_tokenizer(model, MergePolicy::default())?;
    let ids: Vec<TokenId> = ids.iter().copied().map(TokenId).collect();
    println!("{}", tokenizer.decode(&ids));
    Ok(())
}

fn tile(image: &Path, patch_size: u32, max_image_size: Option<u32>) -> Result<()> {
    let pixels = codec::decode_file(image)
        .with_context(|| format!("decoding {}", image.display()))?;
    let env = RuntimeConfig::from_env().preprocess;
    let config = PreprocessConfig {
        patch_size,
        max_image_size: max_image_size.or(env.max_image_size),
        ..env
    };
    let out = preprocess(&pixels, &config)?;
    println!("image     {}x{}", pixels.width, pixels.height);
    println!("template  {}", out.template);
    println!("patches   {:?}", out.patches.dims());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    moondream::logging::init(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Unpack { archive, dest } => unpack(&archive, dest),
        Commands::Tokenize {
            model,
            policy,
            text,
        } => tokenize(&model, policy.into(), &text),
        Commands::Detokenize { model, ids } => detokenize(&model, &ids),
        Commands::Tile {
            image,
            patch_size,
            max_image_size,
        } => tile(&image, patch_size, max_image_size),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
