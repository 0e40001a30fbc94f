/// Probe engine - runs the probe matrix against one device address
///
/// Every probe failure (timeout, exception reply, broken frame, empty data)
/// stays local to its [`ProbeResult`]; the engine always walks the whole
/// matrix and never touches the connection lifecycle.
use super::{
    traits::ModbusTransport,
    transport::TransportError,
    types::{DeviceAddress, DeviceReport, ProbeResult, ProbeSpec},
};

/// Issue a single probe and record its outcome.
pub async fn run_probe<T>(transport: &mut T, address: DeviceAddress, spec: &ProbeSpec) -> ProbeResult
where
    T: ModbusTransport + ?Sized,
{
    let outcome = match transport
        .read(spec.function, address, spec.start, spec.count)
        .await
    {
        Ok(payload) if payload.is_empty() => Err(TransportError::EmptyPayload),
        other => other,
    };

    match &outcome {
        Ok(payload) => log::debug!("Device {address}: {spec} -> {payload}"),
        Err(err) => log::debug!("Device {address}: {spec} failed: {err}"),
    }

    ProbeResult {
        spec: *spec,
        outcome,
    }
}

/// Run every probe of `matrix` in order and fold the results into a report.
pub async fn probe_device<T>(
    transport: &mut T,
    address: DeviceAddress,
    matrix: &[ProbeSpec],
) -> DeviceReport
where
    T: ModbusTransport + ?Sized,
{
    let mut results = Vec::with_capacity(matrix.len());
    for spec in matrix {
        results.push(run_probe(transport, address, spec).await);
    }

    let report = DeviceReport::from_results(address, &results);
    if report.found {
        log::info!(
            "Device {address} answered {}/{} probes",
            results.iter().filter(|result| result.success()).count(),
            results.len()
        );
    }
    report
}
