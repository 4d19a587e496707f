fn main() {
    bench_impact_charts::cli::run();
}
