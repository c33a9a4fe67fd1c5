fn main() {
    #[cfg(feature = "fmi2")]
    {
        println!("cargo:rerun-if-changed=src/fmi2/logger.c");
        cc::Build::new()
            .file("src/fmi2/logger.c")
            .compile("logger");
    }
}
