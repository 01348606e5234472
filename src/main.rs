use colored::Colorize;
use shadercache::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use shadercache::cli::{Command, ShaderCacheCli};

    #[test]
    fn verify_command_honors_purge_flag() {
        let cli = ShaderCacheCli::parse_from(["shadercache", "verify", "--purge"]);
        match cli.command() {
            Command::Verify { purge } => assert!(*purge),
            other => panic!("expected verify command, got {other:?}"),
        }
    }

    #[test]
    fn cache_dir_is_global() {
        let cli = ShaderCacheCli::parse_from([
            "shadercache",
            "show",
            "00ff",
            "--cache-dir",
            "target/shaders",
        ]);
        assert_eq!(
            cli.cache_dir().map(|p| p.to_string_lossy().into_owned()),
            Some("target/shaders".into())
        );
        assert!(matches!(cli.command(), Command::Show { key } if key == "00ff"));
    }
}
