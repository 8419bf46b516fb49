fn main() {
    if let Err(err) = carepass_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
