use std::any::Any;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use hook_bridge::{
    marshal_dynamic, BridgeError, CallRequest, FunctionKey, RecordedCall, RecordingStack,
    Response, ScriptDomain, StackEvent, StackLog,
};

const WORKERS: u64 = 16;
const STRLEN: FunctionKey = FunctionKey::new(0x5354_524C_454E);

fn words_for(index: u64) -> Vec<u64> {
    (0..index % 5).map(|offset| index * 100 + offset).collect()
}

fn echo_domain() -> (ScriptDomain, StackLog) {
    let log = StackLog::new();
    let stack = RecordingStack::with_responder(log.clone(), |key, args| {
        if key == STRLEN {
            // The first argument is a pinned text address that must still be
            // live while the engine runs.
            let text = unsafe { CStr::from_ptr(args[0] as usize as *const c_char) };
            return Response::Word(text.to_bytes().len() as u64);
        }
        Response::Word(key.raw())
    });
    (ScriptDomain::new(stack), log)
}

#[test]
fn concurrent_submits_run_in_acceptance_order() {
    let (domain, log) = echo_domain();
    let barrier = Arc::new(Barrier::new(WORKERS as usize));

    let workers: Vec<_> = (0..WORKERS)
        .map(|index| {
            let handle = domain.handle();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let result = handle.invoke(FunctionKey::new(index), &words_for(index))?;
                Ok::<_, BridgeError>((index, result.generation()))
            })
        })
        .collect();

    while domain.pending() < WORKERS as usize {
        thread::yield_now();
    }
    let accepted = domain.queued_keys();
    assert!(log.is_empty(), "nothing runs before the owner drains");
    assert_eq!(domain.drain(), WORKERS as usize);

    let calls = log.calls().expect("sequences must not interleave");
    assert_eq!(calls.len(), WORKERS as usize);
    let executed: Vec<FunctionKey> = calls.iter().map(|call| call.key).collect();
    assert_eq!(executed, accepted);
    for call in &calls {
        assert_eq!(call.words, words_for(call.key.raw()));
    }

    for worker in workers {
        let (index, generation) = worker.join().unwrap().unwrap();
        let position = accepted
            .iter()
            .position(|key| key.raw() == index)
            .expect("every worker was accepted");
        assert_eq!(generation, position as u64 + 1);
    }
}

#[test]
fn owner_draining_while_workers_submit_keeps_sequences_whole() {
    let (domain, log) = echo_domain();
    let workers: Vec<_> = (0..WORKERS)
        .map(|index| {
            let handle = domain.handle();
            thread::spawn(move || {
                for round in 0..4 {
                    let key = FunctionKey::new(index * 10 + round);
                    handle.invoke(key, &words_for(index))?;
                }
                Ok::<_, BridgeError>(())
            })
        })
        .collect();

    while !workers.iter().all(|worker| worker.is_finished()) {
        domain.drain();
        thread::yield_now();
    }
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    let calls = log.calls().expect("sequences must not interleave");
    assert_eq!(calls.len(), (WORKERS * 4) as usize);
    let keys: BTreeSet<u64> = calls.iter().map(|call| call.key.raw()).collect();
    assert_eq!(keys.len(), calls.len());
    assert_eq!(domain.stats().executed, WORKERS * 4);
    assert_eq!(domain.stats().pending, 0);
}

#[test]
fn pinned_text_is_readable_during_execution() {
    let (domain, log) = echo_domain();
    let handle = domain.handle();
    let worker = thread::spawn(move || {
        let result = handle.invoke_args(STRLEN, &["hello, engine".into()])?;
        Ok::<_, BridgeError>(result.generation())
    });

    while domain.pending() == 0 {
        thread::yield_now();
    }
    domain.drain();
    assert_eq!(worker.join().unwrap(), Ok(1));
    assert!(domain.pins().is_empty(), "lease released once the call is done");

    let result = domain.invoke_immediate_args(STRLEN, &["four".into()]).unwrap();
    assert_eq!(result.read::<u64>().unwrap(), 4);
    assert_eq!(log.calls().unwrap().len(), 2);
}

#[test]
fn unsupported_argument_never_reaches_begin() {
    let (domain, log) = echo_domain();
    let handle = domain.handle();
    let values: [&dyn Any; 3] = [&1i32, &"text", &vec![1u8, 2, 3]];

    let outcome = marshal_dynamic(&values, handle.pins())
        .map(|args| CallRequest::from_marshaled(FunctionKey::new(77), args))
        .and_then(|request| handle.submit(request));

    assert_eq!(
        outcome.unwrap_err(),
        BridgeError::UnsupportedArgumentType {
            position: 2,
            type_name: "unknown",
        }
    );
    let begins = log
        .events()
        .iter()
        .filter(|event| matches!(event, StackEvent::Begin { .. }))
        .count();
    assert_eq!(begins, 0);
    assert!(handle.pins().is_empty());
}

#[test]
fn closing_domain_fails_queued_and_new_calls() {
    let (domain, log) = echo_domain();
    let handle = domain.handle();
    let queued = {
        let handle = handle.clone();
        thread::spawn(move || handle.invoke(FunctionKey::new(1), &[1, 2, 3]).map(|_| ()))
    };
    while domain.pending() == 0 {
        thread::yield_now();
    }
    drop(domain);

    assert_eq!(queued.join().unwrap(), Err(BridgeError::NoActiveDomain));
    let late = thread::spawn(move || handle.invoke(FunctionKey::new(2), &[]).map(|_| ()));
    assert_eq!(late.join().unwrap(), Err(BridgeError::NoActiveDomain));
    assert!(log.is_empty());
}

#[test]
fn long_text_from_worker_arrives_as_ordered_chunks() {
    let log = StackLog::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let domain = ScriptDomain::new(RecordingStack::with_responder(log.clone(), move |_, args| {
        let literal = unsafe { CStr::from_ptr(args[1] as usize as *const c_char) };
        assert_eq!(literal.to_bytes(), b"LITERAL_STRING");
        let chunk = unsafe { CStr::from_ptr(args[2] as usize as *const c_char) };
        sink.lock().unwrap().push(chunk.to_string_lossy().into_owned());
        Response::Void
    }));
    let handle = domain.handle();
    let text: String = (0..250).map(|idx| char::from(b'a' + (idx % 26) as u8)).collect();
    let expected = text.clone();
    let worker = thread::spawn(move || handle.push_long_string(&text));

    while !worker.is_finished() {
        domain.drain();
        thread::yield_now();
    }
    worker.join().unwrap().unwrap();

    let calls: Vec<RecordedCall> = log.calls().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|call| call.key == hook_bridge::VAR_STRING));

    let chunks = received.lock().unwrap().clone();
    let lengths: Vec<usize> = chunks.iter().map(String::len).collect();
    assert_eq!(lengths, vec![99, 99, 52]);
    assert_eq!(chunks.concat(), expected);
    assert!(domain.pins().is_empty());
}
