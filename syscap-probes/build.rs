use which::which;

/// Building this crate has an undeclared dependency on the `bpf-linker` binary.
/// Rebuild whenever the linker found on $PATH changes.
fn main() {
    if let Ok(bpf_linker) = which("bpf-linker") {
        println!("cargo:rerun-if-changed={}", bpf_linker.display());
    }
}
