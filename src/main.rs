fn main() -> anyhow::Result<()> {
    uran_rtc_lib::run()
}
