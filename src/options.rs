use structopt::StructOpt;

#[derive(Clone, StructOpt)]
#[structopt(name = "CLI arguments")]
pub struct CliArgs {
    #[structopt(short = "m", long = "mode",
                help = "Analysis to run. One of:\n\tlinear\n\tdifferential")]
    pub mode: String,

    #[structopt(short = "s", long = "sbox",
                help = "File describing the S-box as decimal (input, output) pairs, one per line.")]
    pub sbox_path: Option<String>,

    #[structopt(short = "k", long = "key",
                help = "Key bits used by the sampling oracle.")]
    pub key: Option<String>,

    #[structopt(short = "n", long = "pairs",
                help = "Number of text pairs to sample.")]
    pub num_pairs: Option<usize>,

    #[structopt(short = "i", long = "input",
                help = "Comma separated input masks or input differences.")]
    pub inputs: Option<String>,
}
