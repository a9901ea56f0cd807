use std::{env, fs};
use std::path::PathBuf;

fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=../PROTOCOL_VERSION");

    let out_dir_path = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let out_file_path = out_dir_path.join("consts.rs");

    let protocol_version: u32 = fs::read_to_string("../PROTOCOL_VERSION")?.trim().parse().unwrap();

    fs::write(&out_file_path, format!("pub const PROTOCOL_VERSION: u32 = {};\n", protocol_version))?;

    Ok(())
}
