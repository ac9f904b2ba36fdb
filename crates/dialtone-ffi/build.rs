fn main() {
    uniffi::generate_scaffolding("src/dialtone.udl").expect("failed to generate UniFFI scaffolding");
}
