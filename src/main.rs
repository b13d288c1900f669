fn main() -> anyhow::Result<()> {
    order_desk_lib::run()
}
