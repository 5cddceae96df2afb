//! Remote deploy script
//!
//! Uploaded to `deploy/<project>/deploy.sh` on the target host and invoked
//! with `<projectName> <composeFile> <overrideFile>`. It owns the remote
//! half of the deployment: replace the stack, wait for it to settle, and
//! fail loudly with container states and logs when anything is not
//! running.

/// Script body uploaded verbatim to the deploy host
pub const DEPLOY_SCRIPT: &str = r#"#!/bin/bash
set -e

echo "--- deploy.sh ---"

PN=$1
CF=$2
OF=$3

echo "Tearing down old containers..."
# Non-fatal: the first deploy has nothing to tear down.
docker compose -p "$PN" down --remove-orphans || true

echo "Pulling new images..."
docker compose -p "$PN" -f "$CF" -f "$OF" pull

echo "Starting containers..."
docker compose -p "$PN" -f "$CF" -f "$OF" up -d --force-recreate --wait

echo "Waiting for stabilization..."
sleep 5

echo "--- Health check ---"
INSPECT_OUTPUT=$(docker compose -p "$PN" -f "$CF" -f "$OF" ps -a -q | xargs docker inspect -f '{{.Name}} | Status: {{.State.Status}} | Running: {{.State.Running}} | ExitCode: {{.State.ExitCode}}' 2>/dev/null || true)

echo "$INSPECT_OUTPUT"

FAILED_CONTAINERS=$(echo "$INSPECT_OUTPUT" | grep -v 'Running: true' || true)

if [ -n "$FAILED_CONTAINERS" ]; then
    echo "--- Deployment failed: unhealthy containers ---"
    echo "$FAILED_CONTAINERS"
    echo "--- Logs ---"
    docker compose -p "$PN" -f "$CF" -f "$OF" logs
    exit 1
fi

echo "--- Health check passed ---"
"#;
