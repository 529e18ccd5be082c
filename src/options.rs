use clap::Parser;
use clap_complete::Shell;

use std::path::PathBuf;

type KV = (String, String);

#[allow(clippy::unnecessary_wraps)]
fn parse_key_val(pair: &str) -> anyhow::Result<KV> {
    if let Some((path, value)) = pair.split_once('=') {
        Ok((path.to_owned(), value.to_owned()))
    } else {
        Ok((pair.to_owned(), String::new()))
    }
}

#[derive(Debug, Parser)]
#[clap(
    name = "argen",
    about = "Archetype generator: declarative scripts and templates in, project trees out"
)]
pub struct Args {
    /// Batch answers as input-path=value pairs.
    #[arg(global = true, num_args(0..))]
    #[clap(short = 'D', value_parser = parse_key_val, required = false)]
    pub inputs: Vec<KV>,
    #[clap(subcommand)]
    pub command: SubCommand,
}

#[derive(Debug, Parser)]
pub struct BaseInput {
    /// The archetype to load: a directory or a .tgz archive.
    pub archetype: PathBuf,
    #[clap(long)]
    /// Entry script within the archetype, defaults to archetype.xml.
    pub script: Option<String>,
}

#[derive(Debug, Parser)]
pub struct BaseOutput {
    #[clap(long, short)]
    /// Write here instead of stdout.
    pub out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct GenerateParams {
    #[clap(flatten)]
    pub input: BaseInput,
    #[clap(long, short)]
    /// Directory the generated project is written into.
    pub output: PathBuf,
    #[clap(long)]
    /// A TOML file of input-path = "value" batch answers.
    ///
    /// Values given with -D take precedence over the file.
    pub answers: Option<PathBuf>,
    #[clap(long, short)]
    /// Prompt for inputs that are not answered by -D or --answers.
    pub interactive: bool,
}

#[derive(Debug, Parser)]
pub struct DataParams {
    #[clap(flatten)]
    pub input: BaseInput,
    #[clap(long)]
    /// Resolve inputs first and dump the resolved context instead of the
    /// script model.
    pub resolved: bool,
    #[clap(flatten)]
    pub out: BaseOutput,
}

#[derive(Debug, Parser)]
pub struct TreeParams {
    #[clap(flatten)]
    pub input: BaseInput,
    #[clap(long)]
    /// Print the tree before preset pruning.
    pub unpruned: bool,
    #[clap(flatten)]
    pub out: BaseOutput,
}

#[derive(Debug, Parser)]
pub struct PermutationParams {
    #[clap(flatten)]
    pub input: BaseInput,
    #[clap(long)]
    /// Stop after this many permutations.
    pub limit: Option<usize>,
    #[clap(flatten)]
    pub out: BaseOutput,
}

#[derive(Debug, Parser)]
pub enum SubCommand {
    /// Generate a project from an archetype.
    Generate(GenerateParams),
    /// Print the debug representation of the loaded script.
    Debug(BaseInput),
    /// Print the canonical XML form of the loaded script.
    Pretty(BaseInput),
    /// Export the script model, or the resolved context, as JSON.
    Data(DataParams),
    /// Export the reachable-input tree as JSON.
    Tree(TreeParams),
    /// Enumerate input permutations as JSON, one per line.
    Permutations(PermutationParams),
    /// Print shell completions.
    #[clap(hide = true)]
    Completions { shell: Shell },
}
