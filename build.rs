fn main() {
    // ESP-IDF link environment is only needed for the on-target build.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
