#![allow(unused)]

use std::path::{Path, PathBuf};

/// Environment variables that may point at directories containing OpenBLAS.
const ENV_LIB_PATHS: [&str; 4] = ["RSTSR_CCD_LIB_DIR", "OPENBLAS_DIR", "LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH"];

/// Prefixes searched after the environment.
const SYSTEM_PREFIXES: [&str; 3] = ["/usr", "/usr/local", "/opt/OpenBLAS"];

/// Library subdirectories under a prefix.
const LIB_SUBDIRS: [&str; 4] = ["", "lib", "lib64", "lib/x86_64-linux-gnu"];

fn separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}

fn has_openblas(dir: &Path) -> bool {
    ["libopenblas.so", "libopenblas.a", "libopenblas.dylib", "openblas.lib"].iter().any(|name| dir.join(name).exists())
}

/// Directories holding an OpenBLAS library, environment first, without duplicates.
fn openblas_dirs() -> Vec<PathBuf> {
    let from_env = ENV_LIB_PATHS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .flat_map(|paths| paths.split(separator()).map(String::from).collect::<Vec<_>>());
    let from_system = SYSTEM_PREFIXES.iter().map(|prefix| prefix.to_string());

    let mut dirs: Vec<PathBuf> = vec![];
    for prefix in from_env.chain(from_system).filter(|p| !p.is_empty()) {
        for sub in LIB_SUBDIRS {
            let dir = Path::new(&prefix).join(sub);
            if !has_openblas(&dir) {
                continue;
            }
            let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

fn link_openblas() {
    for var in ENV_LIB_PATHS {
        println!("cargo:rerun-if-env-changed={var}");
    }
    for dir in openblas_dirs() {
        println!("cargo:rustc-link-search=native={}", dir.display());
    }
    println!("cargo:rustc-link-lib=openblas");
    println!("cargo:rustc-link-lib=gomp");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "use_openblas")]
    link_openblas();
}
