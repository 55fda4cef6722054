fn main() {
    portico::run();
}
