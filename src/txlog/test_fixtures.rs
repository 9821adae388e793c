//! Wallet log blocks laid out the way the wallet node prints them.

/// Two-line "New transaction received" block.
pub(crate) fn received_block(ts: &str, tx_id: &str, amount: &str, address: &str) -> Vec<String> {
    vec![
        format!("{ts} INFO [WalletService] New transaction received, transaction hash id {tx_id}; unlock time 0,"),
        format!("{ts} INFO [WalletService] Incoming transfer amount: {amount}; {address}"),
    ]
}

/// Three-line "created and send" block.
pub(crate) fn sent_block(
    ts: &str,
    tx_id: &str,
    amount: &str,
    dest: &str,
    source: &str,
) -> Vec<String> {
    vec![
        format!("{ts} INFO [WalletService] Transaction created and send successfully, transaction hash {tx_id};"),
        format!("{ts} INFO [WalletService] Transfer 0 of 1, amount sent {amount}; {dest}"),
        format!("{ts} INFO From {source}"),
    ]
}

pub(crate) fn noise_line(ts: &str) -> String {
    format!("{ts} INFO [WalletService] Wallet synchronized, height 1200")
}

/// Render lines as file content, newline terminated.
pub(crate) fn as_log(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
