fn main() {
    println!("cargo:rerun-if-env-changed=TARGET");

    // ESP-IDF sysenv is only emitted for the Xtensa firmware target; host
    // builds (tests, host-node) skip it.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") || target.ends_with("-espidf") {
        embuild::espidf::sysenv::output();
    }
}
