//! Version command - show version information

/// Print version information
///
/// With `verbose`, build details follow the version line.
pub fn print_version(verbose: bool) {
    println!("{} {}", crate::NAME, crate::VERSION);

    if verbose {
        println!();
        println!("Build info:");
        println!("  Target:     {}", env!("BUILD_TARGET"));
        println!("  Rust:       {}", env!("RUSTC_VERSION"));
        if let Ok(exe) = std::env::current_exe() {
            println!("  Executable: {}", exe.display());
        }
    }
}
