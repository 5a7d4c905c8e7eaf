use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a table migration described by a properties file
    Migrate {
        /// Path to the migration properties file
        #[arg(long)]
        config: String,

        /// Optional KEY=VALUE file overlaying the process environment for
        /// ${NAME} references in the properties file
        #[arg(long)]
        env_file: Option<String>,
    },

    /// Plan only: print the chosen split size and partition count
    Plan {
        #[arg(long)]
        config: String,

        #[arg(long)]
        env_file: Option<String>,
    },

    /// Show a run's checkpoint state from the target database
    Status {
        #[arg(long)]
        config: String,

        #[arg(long)]
        env_file: Option<String>,

        /// The run to inspect
        #[arg(long)]
        run_id: i64,
    },
}
