use clap::Parser;

#[derive(Parser)]
#[command(name = "aiproxy", about = "Multi-provider LLM gateway")]
pub(crate) struct Cli {
    #[arg(long, env = "HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "DEBUG")]
    pub(crate) debug: Option<bool>,
    /// Run the interactive auth flow for one provider and exit
    /// (qwen, gemini, antigravity, kiro, iflow).
    #[arg(long, value_name = "PROVIDER")]
    pub(crate) login: Option<String>,
}
