//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "binary"
//! fab_type: "source"
//! fab_scope: "build"
//! fab_description: "Build metadata for the FabSim daemon."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Build and cargo facts only; the daemon must build outside a git checkout.
    EmitBuilder::builder().all_build().all_cargo().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
