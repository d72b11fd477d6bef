use clap::Parser;

/// Generate a pcap file from a list of flow profiles
#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, help = "CSV file of the flow profiles to generate")]
    pub profiles: String,
    #[arg(
        short,
        long = "output",
        default_value = "output.pcap",
        help = "Output pcap file for the generated packets"
    )]
    pub outfile: String,
    #[arg(
        short,
        long,
        default_value = None,
        help = "TOML configuration of fragmentation, encapsulation and packet sizes"
    )]
    pub config: Option<String>,
    #[arg(short, long, help = "Seed for random number generation")]
    pub seed: Option<u64>,
    #[arg(
        short,
        long,
        default_value = None,
        help = "Write the flows as they were actually generated to this CSV file"
    )]
    pub report: Option<String>,
    #[arg(
        long,
        default_value_t = false,
        help = "Do not print the per-flow report at the end of the generation"
    )]
    pub no_report: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn short_options() {
        let args = Args::parse_from([
            "flowgen", "-p", "flows.csv", "-o", "out.pcap", "-s", "12", "-r", "report.csv",
        ]);
        assert_eq!(args.profiles, "flows.csv");
        assert_eq!(args.outfile, "out.pcap");
        assert_eq!(args.seed, Some(12));
        assert_eq!(args.report.as_deref(), Some("report.csv"));
        assert_eq!(args.config, None);
        assert!(!args.no_report);
    }
}
