use bench_cli_common::{init_logging, run_cli_main};
use clap::Parser;
use pparallel_bench::Cli;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_args());

    run_cli_main(cli, |cli| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let task = runtime.spawn(cli.run());
        let result = runtime.block_on(task);

        // Don't wait on tasks which may still be blocked, such as a read of stdin.
        runtime.shutdown_background();

        result?
    });
}
